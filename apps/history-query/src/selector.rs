use crate::error::{HistoryError, HistoryResult};
use crate::sql::SqlParams;

/// Category value meaning "no category filter".
pub const NO_CATEGORY: &str = "none";

pub const METADATA_TABLE: &str = "hai_vars";

/// Which channels a request targets: explicit names, a metadata category, or both.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelSelector {
    channels: Vec<String>,
    category: Option<String>,
}

impl ChannelSelector {
    /// Channel names are trimmed and deduplicated (first occurrence wins);
    /// a blank or `"none"` category disables category filtering.
    pub fn new<I, S>(channels: I, category: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for channel in channels {
            let channel = channel.as_ref().trim();
            if channel.is_empty() || unique.iter().any(|known| known == channel) {
                continue;
            }
            unique.push(channel.to_string());
        }

        let category = category.trim();
        let category = if category.is_empty() || category == NO_CATEGORY {
            None
        } else {
            Some(category.to_string())
        };

        Self {
            channels: unique,
            category,
        }
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.category.is_none()
    }

    pub fn validate(&self) -> HistoryResult<()> {
        if self.is_empty() {
            return Err(HistoryError::configuration(
                "no channel or category specified",
            ));
        }
        Ok(())
    }

    /// Compiles the selector into a predicate over `{alias}.channel_name`.
    ///
    /// Every channel name and the category are bound through `params`.
    pub fn compile(&self, alias: &str, params: &mut SqlParams) -> String {
        let column = format!("{alias}.channel_name");
        match (self.channels.is_empty(), self.category.as_deref()) {
            (false, Some(category)) => {
                let category = params.push(category.to_string());
                let names = params.push_list(self.channels.iter().cloned());
                format!(
                    "{column} IN (SELECT channel_name FROM {METADATA_TABLE} WHERE category = {category} AND channel_name IN ({names}))"
                )
            }
            (false, None) => {
                let names = params.push_list(self.channels.iter().cloned());
                format!("{column} IN ({names})")
            }
            (true, Some(category)) => {
                let category = params.push(category.to_string());
                format!(
                    "{column} IN (SELECT channel_name FROM {METADATA_TABLE} WHERE category = {category})"
                )
            }
            (true, None) => "1 = 1".to_string(),
        }
    }
}
