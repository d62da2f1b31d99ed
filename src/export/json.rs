use anyhow::Result;
use serde::Serialize;
use std::io::Write;

/// Serialize a report (or any report-shaped value) to a JSON string
pub fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}

/// Write JSON followed by a newline
pub fn write_json<W: Write, T: Serialize>(mut writer: W, value: &T, pretty: bool) -> Result<()> {
    let json = to_json(value, pretty)?;
    writeln!(writer, "{}", json)?;
    Ok(())
}
