use std::fmt;

/// Строковое сообщение, публикуемое в тему.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub data: String,
}

impl Message {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}

impl From<&str> for Message {
    fn from(data: &str) -> Self {
        Self::new(data)
    }
}

impl From<String> for Message {
    fn from(data: String) -> Self {
        Self { data }
    }
}

impl fmt::Display for Message {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "[{}]", self.data)
    }
}
