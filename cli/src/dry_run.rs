use autoflow_model::prelude::{ActionKind, Selector};
use autoflow_runner::prelude::{ElementHandle, ElementLocator, LocatorError, TargetScope};

/// Locator used to exercise scenarios without a host automation binding:
/// every element resolves immediately and actions are logged instead of
/// performed. Lets engineers validate scenario structure, data bindings and
/// control flow before pointing at a live target.
pub struct DryRunLocator;

impl ElementLocator for DryRunLocator {
    fn locate(
        &self,
        selector: &Selector,
        scope: &TargetScope,
    ) -> Result<ElementHandle, LocatorError> {
        Ok(ElementHandle::new(format!("{scope}/{selector}")))
    }

    fn act(&self, handle: &ElementHandle, action: &ActionKind) -> Result<(), LocatorError> {
        log::info!("[dry-run] {:?} on {}", action, handle.token());
        Ok(())
    }

    fn read_text(&self, handle: &ElementHandle) -> Result<String, LocatorError> {
        log::info!("[dry-run] read text from {}", handle.token());
        Ok(String::new())
    }

    fn target_alive(&self, _scope: &TargetScope) -> bool {
        true
    }
}
