//! Client identity.

use std::fmt;

/// Identifies one engine instance for the lifetime of the process.
///
/// Notifications carry the writer's ID so each engine can recognise its own
/// writes coming back over the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Use an explicit ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate `{unix-millis}.{pid}.{random}`.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}.{}.{}", millis, std::process::id(), &random[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn generated_id_shape() {
        let id = ClientId::generate();
        let parts: Vec<_> = id.as_str().split('.').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].parse::<i64>().is_ok());
        assert_eq!(parts[1], std::process::id().to_string());
        assert_eq!(parts[2].len(), 12);
    }
}
