use crate::driver::DriverError;

// PRELOGIN option tokens
const OPTION_VERSION: u8 = 0x00;
const OPTION_ENCRYPTION: u8 = 0x01;
const OPTION_INSTOPT: u8 = 0x02;
const OPTION_THREADID: u8 = 0x03;
const OPTION_MARS: u8 = 0x04;
const OPTION_TERMINATOR: u8 = 0xFF;

// option token + offset (u16 BE) + length (u16 BE)
const OPTION_HEADER_LEN: usize = 5;

/// Client driver version advertised in PRELOGIN (major, minor, build, sub-build)
const CLIENT_VERSION: [u8; 6] = [0x00, 0x01, 0x00, 0x00, 0x00, 0x00];

/// Encryption negotiation values of the PRELOGIN `ENCRYPTION` option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encryption {
    /// Encrypt the login only
    Off = 0x00,
    On = 0x01,
    NotSupported = 0x02,
    Required = 0x03,
}

impl TryFrom<u8> for Encryption {
    type Error = DriverError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Off),
            0x01 => Ok(Self::On),
            0x02 => Ok(Self::NotSupported),
            0x03 => Ok(Self::Required),
            other => Err(DriverError::Protocol(format!(
                "unknown PRELOGIN encryption value 0x{other:02x}"
            ))),
        }
    }
}

impl Encryption {
    /// Whether the server will switch the transport to TLS after PRELOGIN
    #[must_use]
    pub const fn upgrades(self) -> bool {
        !matches!(self, Self::NotSupported)
    }
}

/// Encode the client PRELOGIN payload
#[must_use]
pub fn encode(encryption: Encryption) -> Vec<u8> {
    let options: [(u8, &[u8]); 5] = [
        (OPTION_VERSION, &CLIENT_VERSION),
        (OPTION_ENCRYPTION, &[encryption as u8]),
        // empty instance name, NUL terminated
        (OPTION_INSTOPT, &[0x00]),
        (OPTION_THREADID, &[0x00, 0x00, 0x00, 0x00]),
        (OPTION_MARS, &[0x00]),
    ];

    let mut offset = options.len() * OPTION_HEADER_LEN + 1;
    let mut headers = Vec::with_capacity(offset);
    let mut data = Vec::new();

    for (token, value) in options {
        headers.push(token);
        headers.extend_from_slice(&u16::try_from(offset).unwrap_or(u16::MAX).to_be_bytes());
        headers.extend_from_slice(&u16::try_from(value.len()).unwrap_or(u16::MAX).to_be_bytes());
        data.extend_from_slice(value);
        offset += value.len();
    }
    headers.push(OPTION_TERMINATOR);
    headers.extend_from_slice(&data);

    headers
}

/// Extract the server's `ENCRYPTION` option from a PRELOGIN response payload
///
/// # Errors
///
/// Returns an error if the option table is truncated, points outside the
/// payload, or the encryption option is missing
pub fn decode_encryption(payload: &[u8]) -> Result<Encryption, DriverError> {
    let mut cursor = 0;

    loop {
        let token = *payload.get(cursor).ok_or_else(|| {
            DriverError::Protocol("PRELOGIN response missing option terminator".to_string())
        })?;
        if token == OPTION_TERMINATOR {
            break;
        }

        let option = payload
            .get(cursor + 1..cursor + OPTION_HEADER_LEN)
            .ok_or_else(|| DriverError::Protocol("truncated PRELOGIN option".to_string()))?;
        let (offset, length) = match option {
            [o1, o2, l1, l2] => (
                usize::from(u16::from_be_bytes([*o1, *o2])),
                usize::from(u16::from_be_bytes([*l1, *l2])),
            ),
            _ => {
                return Err(DriverError::Protocol(
                    "truncated PRELOGIN option".to_string(),
                ));
            }
        };

        if token == OPTION_ENCRYPTION {
            if length != 1 {
                return Err(DriverError::Protocol(format!(
                    "invalid PRELOGIN encryption length {length}"
                )));
            }
            let value = payload.get(offset).ok_or_else(|| {
                DriverError::Protocol("PRELOGIN encryption offset out of range".to_string())
            })?;
            return Encryption::try_from(*value);
        }

        cursor += OPTION_HEADER_LEN;
    }

    Err(DriverError::Protocol(
        "PRELOGIN response has no encryption option".to_string(),
    ))
}
