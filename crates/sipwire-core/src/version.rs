use std::fmt;

/// Protocol version carried on every start line and Via header.
///
/// The stack speaks SIP/2.0 only; the parser clamps anything else to this
/// value, so downstream layers never see another version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SipVersion {
    #[default]
    V2,
}

impl SipVersion {
    pub fn as_str(&self) -> &'static str {
        "SIP/2.0"
    }
}

impl fmt::Display for SipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
