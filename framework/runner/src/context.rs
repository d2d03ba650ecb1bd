use autoflow_model::prelude::{DataRow, Variables};

/// Mutable state scoped to one run: data row values, loop counters and
/// runtime variables captured with `GetText`.
///
/// Owned exclusively by one scenario runner instance. Created at run start,
/// discarded at run end; never shared across sessions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    variables: Variables,
    data_row_index: Option<usize>,
    call_depth: usize,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: Variables) -> Self {
        Self {
            variables,
            ..Default::default()
        }
    }

    /// Context for one row of a data-driven run. `extra` wins over row
    /// values on column/variable name collisions.
    pub fn for_data_row(index: usize, row: &DataRow, extra: &Variables) -> Self {
        let mut variables: Variables = row.clone();
        variables.extend(extra.clone());
        Self {
            variables,
            data_row_index: Some(index),
            call_depth: 0,
        }
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub(crate) fn remove_var(&mut self, name: &str) -> Option<String> {
        self.variables.remove(name)
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn data_row_index(&self) -> Option<usize> {
        self.data_row_index
    }

    pub(crate) fn call_depth(&self) -> usize {
        self.call_depth
    }

    pub(crate) fn enter_call(&mut self) {
        self.call_depth += 1;
    }

    pub(crate) fn exit_call(&mut self) {
        debug_assert!(self.call_depth > 0);
        self.call_depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_row_context_prefers_extra_variables() {
        let row: DataRow = [
            ("user".to_string(), "ada".to_string()),
            ("id".to_string(), "1".to_string()),
        ]
        .into_iter()
        .collect();
        let extra: Variables = [("id".to_string(), "override".to_string())]
            .into_iter()
            .collect();

        let ctx = ExecutionContext::for_data_row(3, &row, &extra);
        assert_eq!(ctx.get_var("user"), Some("ada"));
        assert_eq!(ctx.get_var("id"), Some("override"));
        assert_eq!(ctx.data_row_index(), Some(3));
    }
}
