mod cancel;
mod pause;

pub mod prelude {
    pub use crate::cancel::{CancelHandle, CancelListener};
    pub use crate::pause::PauseSwitch;
}
