use rusqlite::types::Value;

/// Positional bind parameters for a statement under construction.
///
/// Each pushed value gets the next `?N` placeholder; the text returned by
/// [`SqlParams::push`] is the only thing that lands in the SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlParams {
    values: Vec<Value>,
}

impl SqlParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        format!("?{}", self.values.len())
    }

    /// Pushes every item and returns `?a, ?b, ...`.
    pub fn push_list<I, V>(&mut self, items: I) -> String
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        items
            .into_iter()
            .map(|item| self.push(item))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Double-quotes an identifier. Table names are planner-generated, never user text.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
