use justconfig::error::ConfigError;
use justconfig::item::{MapAction, StringItem};

/// Remove quotes from configuration strings.
pub trait Unquote
where
    Self: Sized,
{
    fn unquote(self) -> Result<StringItem, ConfigError>;
}

impl Unquote for Result<StringItem, ConfigError> {
    /// Values are trimmed; a surrounding pair of double quotes is removed, anything else is
    /// kept as is.
    fn unquote(self) -> Result<StringItem, ConfigError> {
        self?.map(|v| match strip_quotes(v.trim()) {
            Some(inner) => MapAction::Replace(vec![inner.to_owned()]),
            None => MapAction::Keep,
        })
    }
}

/// Expand memory sizes such as `512M` or `8GiB` into a plain number of bytes.
pub trait ExpandByteUnits
where
    Self: Sized,
{
    fn expand_byte_units(self) -> Result<StringItem, ConfigError>;
}

impl ExpandByteUnits for Result<StringItem, ConfigError> {
    /// Units are powers of 1024 and case insensitive. Values that are not a size are kept, so
    /// the later conversion reports them.
    fn expand_byte_units(self) -> Result<StringItem, ConfigError> {
        self?.map(|v| match parse_byte_size(v.trim()) {
            Some(bytes) => MapAction::Replace(vec![bytes.to_string()]),
            None => MapAction::Keep,
        })
    }
}

fn strip_quotes(value: &str) -> Option<&str> {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        Some(&value[1..value.len() - 1])
    } else {
        None
    }
}

fn parse_byte_size(value: &str) -> Option<u64> {
    let value = strip_quotes(value).unwrap_or(value).trim();
    let digits_end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, unit) = value.split_at(digits_end);
    if digits.is_empty() {
        return None;
    }

    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        _ => return None,
    };
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}
