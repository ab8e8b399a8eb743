use serde::{Deserialize, Serialize};

/// Loading state of a fetched value as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum Resource<T> {
    Loading,
    Success(T),
    Error(String),
}

impl<T> Resource<T> {
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub const fn data(&self) -> Option<&T> {
        match self {
            Self::Success(data) => Some(data),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resource<U> {
        match self {
            Self::Loading => Resource::Loading,
            Self::Success(data) => Resource::Success(f(data)),
            Self::Error(message) => Resource::Error(message),
        }
    }

    /// Map the success value through a fallible conversion, turning its
    /// error into `Resource::Error`.
    pub fn and_then<U, E: std::fmt::Display>(
        self,
        f: impl FnOnce(T) -> Result<U, E>,
    ) -> Resource<U> {
        match self {
            Self::Loading => Resource::Loading,
            Self::Success(data) => match f(data) {
                Ok(value) => Resource::Success(value),
                Err(error) => Resource::Error(error.to_string()),
            },
            Self::Error(message) => Resource::Error(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_then_turns_conversion_failure_into_error() {
        let parsed: Resource<u32> = Resource::Success("12").and_then(str::parse);
        assert_eq!(parsed, Resource::Success(12));

        let failed: Resource<u32> = Resource::Success("twelve").and_then(str::parse);
        assert!(failed.is_error());

        let loading: Resource<u32> = Resource::<&str>::Loading.and_then(str::parse);
        assert!(loading.is_loading());
    }

    #[test]
    fn resource_serializes_with_state_tag() {
        let json = serde_json::to_value(Resource::Success(3)).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "success", "data": 3 }));
        assert_eq!(Resource::Success(3).data(), Some(&3));
    }
}
