//! Live signal source: ELM327 adapter over a serial link.
//!
//! Speaks the minimal AT + mode-01 subset needed for the fixed PID set the
//! loop samples every tick. Any transport failure surfaces as a
//! [`ReadError`] so the acquisition loop can count it toward its reconnect
//! threshold; a missing or inert PID is just an absent field.

use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serialport::SerialPort;

use super::{ConnectError, RawFrame, ReadError, SignalSource};

const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1500);

// Mode 01 PIDs queried every tick.
const PID_ENGINE_LOAD: u8 = 0x04;
const PID_COOLANT_TEMP: u8 = 0x05;
const PID_RPM: u8 = 0x0C;
const PID_SPEED: u8 = 0x0D;
const PID_MAF: u8 = 0x10;
const PID_THROTTLE: u8 = 0x11;

pub struct Elm327Source {
    port: Option<Box<dyn SerialPort>>,
}

impl Elm327Source {
    /// Open the adapter and run the AT init sequence.
    ///
    /// A missing device path is reported as [`ConnectError::DeviceMissing`]
    /// so the probe can distinguish "no adapter plugged in" from a broken
    /// one.
    pub fn connect(path: &str, baud_rate: u32) -> Result<Self, ConnectError> {
        if !Path::new(path).exists() {
            return Err(ConnectError::DeviceMissing(path.to_string()));
        }

        let port = serialport::new(path, baud_rate)
            .timeout(RESPONSE_TIMEOUT)
            .open()
            .map_err(|e| ConnectError::Open(e.to_string()))?;

        let mut source = Elm327Source { port: Some(port) };

        // Reset, echo off, linefeeds off, auto protocol selection.
        for cmd in ["ATZ", "ATE0", "ATL0", "ATSP0"] {
            source
                .command(cmd)
                .map_err(|e| ConnectError::Handshake(format!("{} failed: {}", cmd, e)))?;
        }

        Ok(source)
    }

    /// Send one command and collect the response up to the `>` prompt.
    fn command(&mut self, cmd: &str) -> Result<String, ReadError> {
        let port = self.port.as_mut().ok_or(ReadError::Closed)?;

        port.write_all(cmd.as_bytes())?;
        port.write_all(b"\r")?;
        port.flush()?;

        let mut raw = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if byte[0] == b'>' {
                        break;
                    }
                    raw.push(byte[0]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ReadError::Io(e)),
            }
        }

        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    fn query_pid(&mut self, pid: u8) -> Result<Option<Vec<u8>>, ReadError> {
        let response = self.command(&format!("01{:02X}", pid))?;
        Ok(decode_pid_payload(&response, pid))
    }
}

impl SignalSource for Elm327Source {
    fn name(&self) -> &'static str {
        "elm327"
    }

    fn poll(&mut self) -> Result<RawFrame, ReadError> {
        Ok(RawFrame {
            rpm: self.query_pid(PID_RPM)?.as_deref().and_then(decode_rpm),
            speed_kmh: self.query_pid(PID_SPEED)?.as_deref().and_then(decode_speed),
            coolant_c: self.query_pid(PID_COOLANT_TEMP)?.as_deref().and_then(decode_temp),
            throttle_pct: self.query_pid(PID_THROTTLE)?.as_deref().and_then(decode_percent),
            load_pct: self.query_pid(PID_ENGINE_LOAD)?.as_deref().and_then(decode_percent),
            maf_gps: self.query_pid(PID_MAF)?.as_deref().and_then(decode_maf),
        })
    }

    fn close(&mut self) {
        self.port = None;
    }
}

/// Extract the data bytes of a mode-01 response line (`41 <pid> ...`).
///
/// Tolerates echoed commands, `SEARCHING...` banners, and adapters that
/// answer with or without spaces between hex pairs. Returns `None` for
/// `NO DATA` and anything else that is not a positive response to `pid`.
fn decode_pid_payload(response: &str, pid: u8) -> Option<Vec<u8>> {
    for line in response.lines() {
        let compact: String = line.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        if compact.len() < 6 || compact.len() % 2 != 0 {
            // Status banners ("SEARCHING...", "NO DATA") never survive the
            // hex filter with a well-formed even length.
            continue;
        }

        let mut bytes = Vec::with_capacity(compact.len() / 2);
        let mut valid = true;
        for i in (0..compact.len()).step_by(2) {
            match u8::from_str_radix(&compact[i..i + 2], 16) {
                Ok(b) => bytes.push(b),
                Err(_) => {
                    valid = false;
                    break;
                }
            }
        }
        if !valid {
            continue;
        }

        if bytes[0] == 0x41 && bytes[1] == pid {
            return Some(bytes[2..].to_vec());
        }
    }
    None
}

fn decode_rpm(data: &[u8]) -> Option<f64> {
    // ((A*256)+B)/4
    if data.len() >= 2 {
        Some((data[0] as f64 * 256.0 + data[1] as f64) / 4.0)
    } else {
        None
    }
}

fn decode_speed(data: &[u8]) -> Option<f64> {
    // A, km/h
    data.first().map(|a| *a as f64)
}

fn decode_temp(data: &[u8]) -> Option<f64> {
    // A-40, degrees C
    data.first().map(|a| *a as f64 - 40.0)
}

fn decode_percent(data: &[u8]) -> Option<f64> {
    // A*100/255
    data.first().map(|a| *a as f64 * 100.0 / 255.0)
}

fn decode_maf(data: &[u8]) -> Option<f64> {
    // ((A*256)+B)/100, g/s
    if data.len() >= 2 {
        Some((data[0] as f64 * 256.0 + data[1] as f64) / 100.0)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_spaced_and_compact_responses() {
        assert_eq!(decode_pid_payload("41 0C 1A F8\r", PID_RPM), Some(vec![0x1A, 0xF8]));
        assert_eq!(decode_pid_payload("410C1AF8", PID_RPM), Some(vec![0x1A, 0xF8]));
    }

    #[test]
    fn skips_banners_and_echo() {
        let response = "010D\rSEARCHING...\r41 0D 3C\r";
        assert_eq!(decode_pid_payload(response, PID_SPEED), Some(vec![0x3C]));
    }

    #[test]
    fn no_data_yields_none() {
        assert_eq!(decode_pid_payload("NO DATA\r", PID_MAF), None);
        assert_eq!(decode_pid_payload("UNABLE TO CONNECT\r", PID_MAF), None);
        assert_eq!(decode_pid_payload("", PID_MAF), None);
    }

    #[test]
    fn mismatched_pid_is_ignored() {
        assert_eq!(decode_pid_payload("41 0C 1A F8\r", PID_SPEED), None);
    }

    #[test]
    fn value_decoding_matches_obd_formulas() {
        assert_eq!(decode_rpm(&[0x1A, 0xF8]), Some(1726.0));
        assert_eq!(decode_speed(&[0x3C]), Some(60.0));
        assert_eq!(decode_temp(&[0x7D]), Some(85.0));
        assert_eq!(decode_maf(&[0x01, 0xF4]), Some(5.0));
        let pct = decode_percent(&[0x80]).unwrap();
        assert!((pct - 50.19).abs() < 0.01);
        assert_eq!(decode_rpm(&[0x1A]), None);
    }
}
