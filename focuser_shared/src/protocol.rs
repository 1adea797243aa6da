//! Line protocol spoken between the host and the focuser board server.
//!
//! Each request is a single line `<verb> [args...]`. The board answers with
//! `ok [values...]` or `err <message>`. Booleans travel as `0`/`1`.

use crate::hardware_traits::{LinkError, TemperatureSource};
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest line either side will buffer, newline included.
pub const MAX_LINE_BYTES: u64 = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Initialize,
    AxisStatus,
    GetPosition,
    SetPosition(i32),
    GotoTarget { target: i32, period_ticks: f64, direction: bool },
    Increment { ticks: u32, period_ticks: f64, direction: bool },
    Stop { hard: bool },
    GetGridPerRevolution,
    SetGridPerRevolution(u32),
    GetHomePosition,
    GetTimerFrequency,
    GetMinPeriod,
    GetMaxPeriod,
    SetBacklashPeriod(f64),
    SetBacklashCycles(u32),
    EnableBacklash(bool),
    SetMotorType(bool),
    SetDebug(bool),
    GetTemperature(TemperatureSource),
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

fn source_token(source: TemperatureSource) -> &'static str {
    match source {
        TemperatureSource::OneWire => "one_wire",
        TemperatureSource::AnalogPin14 => "pin14",
        TemperatureSource::AnalogPin15 => "pin15",
    }
}

/// Parse the `index`-th whitespace separated field.
pub fn field<T: FromStr>(fields: &[&str], index: usize, what: &str) -> Result<T, LinkError> {
    let raw = fields
        .get(index)
        .ok_or_else(|| LinkError::Malformed(format!("missing {}", what)))?;
    raw.parse::<T>()
        .map_err(|_| LinkError::Malformed(format!("invalid {}: '{}'", what, raw)))
}

pub fn flag_field(fields: &[&str], index: usize, what: &str) -> Result<bool, LinkError> {
    match fields.get(index).copied() {
        Some("1") => Ok(true),
        Some("0") => Ok(false),
        Some(other) => Err(LinkError::Malformed(format!("invalid {}: '{}'", what, other))),
        None => Err(LinkError::Malformed(format!("missing {}", what))),
    }
}

impl Request {
    pub fn encode(&self) -> String {
        match self {
            Request::Initialize => "init".to_string(),
            Request::AxisStatus => "status".to_string(),
            Request::GetPosition => "get_pos".to_string(),
            Request::SetPosition(ticks) => format!("set_pos {}", ticks),
            Request::GotoTarget { target, period_ticks, direction } => {
                format!("goto {} {} {}", target, period_ticks, flag(*direction))
            }
            Request::Increment { ticks, period_ticks, direction } => {
                format!("inc {} {} {}", ticks, period_ticks, flag(*direction))
            }
            Request::Stop { hard } => format!("stop {}", flag(*hard)),
            Request::GetGridPerRevolution => "get_grid".to_string(),
            Request::SetGridPerRevolution(value) => format!("set_grid {}", value),
            Request::GetHomePosition => "get_home".to_string(),
            Request::GetTimerFrequency => "timer_freq".to_string(),
            Request::GetMinPeriod => "min_period".to_string(),
            Request::GetMaxPeriod => "max_period".to_string(),
            Request::SetBacklashPeriod(period) => format!("bl_period {}", period),
            Request::SetBacklashCycles(cycles) => format!("bl_cycles {}", cycles),
            Request::EnableBacklash(enabled) => format!("bl_enable {}", flag(*enabled)),
            Request::SetMotorType(tmc) => format!("motor {}", flag(*tmc)),
            Request::SetDebug(enabled) => format!("debug {}", flag(*enabled)),
            Request::GetTemperature(source) => format!("temp {}", source_token(*source)),
        }
    }

    pub fn parse(line: &str) -> Result<Self, LinkError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let verb = fields
            .first()
            .ok_or_else(|| LinkError::Malformed("empty request".to_string()))?;
        let request = match *verb {
            "init" => Request::Initialize,
            "status" => Request::AxisStatus,
            "get_pos" => Request::GetPosition,
            "set_pos" => Request::SetPosition(field(&fields, 1, "position")?),
            "goto" => Request::GotoTarget {
                target: field(&fields, 1, "target")?,
                period_ticks: field(&fields, 2, "period")?,
                direction: flag_field(&fields, 3, "direction")?,
            },
            "inc" => Request::Increment {
                ticks: field(&fields, 1, "ticks")?,
                period_ticks: field(&fields, 2, "period")?,
                direction: flag_field(&fields, 3, "direction")?,
            },
            "stop" => Request::Stop { hard: flag_field(&fields, 1, "hard")? },
            "get_grid" => Request::GetGridPerRevolution,
            "set_grid" => Request::SetGridPerRevolution(field(&fields, 1, "grid")?),
            "get_home" => Request::GetHomePosition,
            "timer_freq" => Request::GetTimerFrequency,
            "min_period" => Request::GetMinPeriod,
            "max_period" => Request::GetMaxPeriod,
            "bl_period" => Request::SetBacklashPeriod(field(&fields, 1, "period")?),
            "bl_cycles" => Request::SetBacklashCycles(field(&fields, 1, "cycles")?),
            "bl_enable" => Request::EnableBacklash(flag_field(&fields, 1, "enabled")?),
            "motor" => Request::SetMotorType(flag_field(&fields, 1, "motor")?),
            "debug" => Request::SetDebug(flag_field(&fields, 1, "debug")?),
            "temp" => {
                let source = match fields.get(1).copied() {
                    Some("one_wire") => TemperatureSource::OneWire,
                    Some("pin14") => TemperatureSource::AnalogPin14,
                    Some("pin15") => TemperatureSource::AnalogPin15,
                    other => {
                        return Err(LinkError::Malformed(format!("invalid sensor: {:?}", other)));
                    }
                };
                Request::GetTemperature(source)
            }
            other => return Err(LinkError::Malformed(format!("unknown verb '{}'", other))),
        };
        Ok(request)
    }
}

/// Split a board reply into its value fields, turning `err` replies into errors.
pub fn parse_reply(line: &str) -> Result<Vec<String>, LinkError> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("ok") {
        if !rest.is_empty() && !rest.starts_with(' ') {
            return Err(LinkError::Malformed(line.to_string()));
        }
        return Ok(rest.split_whitespace().map(str::to_string).collect());
    }
    if let Some(message) = line.strip_prefix("err") {
        return Err(LinkError::Remote(message.trim().to_string()));
    }
    Err(LinkError::Malformed(line.to_string()))
}

/// Single typed value of a reply.
pub fn value<T: FromStr>(reply: &[String], what: &str) -> Result<T, LinkError> {
    let fields: Vec<&str> = reply.iter().map(String::as_str).collect();
    field(&fields, 0, what)
}

/// Whether the board acknowledged a command (`ok 1`) or refused it (`ok 0`).
pub fn acknowledged(reply: &[String]) -> Result<bool, LinkError> {
    let fields: Vec<&str> = reply.iter().map(String::as_str).collect();
    flag_field(&fields, 0, "acknowledge")
}

/// Read one newline-terminated line of at most `MAX_LINE_BYTES`.
///
/// Returns `Ok(0)` at end of stream. A longer line is an `InvalidData` error;
/// the stream is out of step after that and should be dropped.
pub async fn read_line<R>(reader: &mut R, line: &mut String) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let read = (&mut *reader).take(MAX_LINE_BYTES).read_line(line).await?;
    if read as u64 == MAX_LINE_BYTES && !line.ends_with('\n') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("line longer than {} bytes", MAX_LINE_BYTES),
        ));
    }
    Ok(read)
}

pub fn ok_reply(values: &[String]) -> String {
    if values.is_empty() {
        "ok".to_string()
    } else {
        format!("ok {}", values.join(" "))
    }
}

pub fn err_reply(message: &str) -> String {
    format!("err {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_line_caps_length() {
        let mut reader: &[u8] = b"ok 42\nnext\n";
        let mut line = String::new();
        assert_eq!(read_line(&mut reader, &mut line).await.unwrap(), 6);
        assert_eq!(line, "ok 42\n");

        let flood = vec![b'x'; 1024];
        let mut reader: &[u8] = &flood;
        let mut line = String::new();
        let err = read_line(&mut reader, &mut line).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert_eq!(line.len() as u64, MAX_LINE_BYTES);

        let mut reader: &[u8] = b"";
        assert_eq!(read_line(&mut reader, &mut String::new()).await.unwrap(), 0);
    }

    #[test]
    fn test_goto_request_survives_the_wire() {
        let request = Request::GotoTarget { target: 5000, period_ticks: 12.5, direction: true };
        let line = request.encode();
        assert_eq!(line, "goto 5000 12.5 1");
        assert_eq!(Request::parse(&line).unwrap(), request);
    }

    #[test]
    fn test_temperature_source_tokens() {
        let parsed = Request::parse("temp pin15").unwrap();
        assert_eq!(parsed, Request::GetTemperature(TemperatureSource::AnalogPin15));
        assert!(Request::parse("temp pin99").is_err());
    }

    #[test]
    fn test_rejects_unknown_verb_and_bad_flags() {
        assert!(matches!(Request::parse("warp 9"), Err(LinkError::Malformed(_))));
        assert!(matches!(Request::parse("stop 2"), Err(LinkError::Malformed(_))));
        assert!(matches!(Request::parse(""), Err(LinkError::Malformed(_))));
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply("ok 1 0 1\n").unwrap(), vec!["1", "0", "1"]);
        assert!(parse_reply("ok").unwrap().is_empty());
        assert!(matches!(parse_reply("err busy"), Err(LinkError::Remote(m)) if m == "busy"));
        assert!(matches!(parse_reply("okay"), Err(LinkError::Malformed(_))));
    }
}
