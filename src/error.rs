use wasm_bindgen::JsValue;

/// Errors surfaced by the reader, the writer and the analyzer.
///
/// Messages are captured as strings so a failed parse can keep its error on the
/// returned document and the document stays `Clone`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GpxError {
    #[error("malformed XML: {0}")]
    MalformedXml(String),

    #[error("invalid number '{value}' in <{field}>")]
    BadNumber { field: String, value: String },

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, GpxError>;

impl From<quick_xml::Error> for GpxError {
    fn from(e: quick_xml::Error) -> Self {
        match e {
            quick_xml::Error::Io(io) => Self::Io(io.to_string()),
            other => Self::MalformedXml(other.to_string()),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for GpxError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        Self::MalformedXml(e.to_string())
    }
}

impl From<std::io::Error> for GpxError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<std::str::Utf8Error> for GpxError {
    fn from(e: std::str::Utf8Error) -> Self {
        Self::MalformedXml(e.to_string())
    }
}

impl From<GpxError> for JsValue {
    fn from(e: GpxError) -> Self {
        JsValue::from_str(&e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_io_kind() {
        let e: GpxError = std::io::Error::other("disk gone").into();
        assert_eq!(e, GpxError::Io("disk gone".to_string()));
    }

    #[test]
    fn test_display() {
        let e = GpxError::BadNumber {
            field: "ele".to_string(),
            value: "abc".to_string(),
        };
        assert_eq!(e.to_string(), "invalid number 'abc' in <ele>");
        assert_eq!(GpxError::Cancelled.to_string(), "cancelled");
    }
}
