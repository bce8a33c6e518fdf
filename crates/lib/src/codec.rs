use std::io::{BufRead, Write};
use thiserror::Error;

use crate::protocol::{TaskCode, Unit};

/// Write one unit to a writer
pub fn write_unit(writer: &mut impl Write, unit: &Unit) -> Result<(), CodecError> {
    writer.write_all(unit.encode().as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Write a request: the task code, then the optional argument
pub fn write_request(
    writer: &mut impl Write,
    task: TaskCode,
    argument: Option<&str>,
) -> Result<(), CodecError> {
    let mut buf = Unit::Int(task.code()).encode();
    if let Some(arg) = argument {
        buf.push_str(&Unit::text(arg).encode());
    }
    writer.write_all(buf.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Read one unit from a buffered reader
pub fn read_unit(reader: &mut impl BufRead) -> Result<Unit, CodecError> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Err(CodecError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed",
        )));
    }
    decode_frame(&line)
}

/// Read a request sent by [`write_request`]
pub fn read_request(reader: &mut impl BufRead) -> Result<(TaskCode, Option<String>), CodecError> {
    let task = match read_unit(reader)? {
        Unit::Int(code) => TaskCode::from_code(code)
            .ok_or_else(|| CodecError::Protocol(format!("unknown task code: {code}")))?,
        other => {
            return Err(CodecError::Protocol(format!(
                "expected task code, got {} unit",
                other.kind()
            )));
        }
    };

    if !task.takes_argument() {
        return Ok((task, None));
    }

    match read_unit(reader)? {
        Unit::Text(arg) => Ok((task, Some(arg))),
        other => Err(CodecError::Protocol(format!(
            "expected text argument for {task}, got {} unit",
            other.kind()
        ))),
    }
}

/// Decode one complete `\n`-terminated line
pub fn decode_frame(bytes: &[u8]) -> Result<Unit, CodecError> {
    if bytes.last() != Some(&b'\n') {
        return Err(CodecError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed mid-line",
        )));
    }
    let line = std::str::from_utf8(bytes)
        .map_err(|e| CodecError::Protocol(format!("unit is not valid UTF-8: {e}")))?;
    Unit::decode(line).map_err(CodecError::Protocol)
}

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}
