use super::packet::PACKET_SIZE;

/// TDS 7.4
const TDS_VERSION: u32 = 0x7400_0004;

const FIXED_LEN: usize = 94;

// fUseDB | fDatabase (fatal) | fSetLang
const OPTION_FLAGS_1: u8 = 0xE0;
// fLanguage (fatal) | fODBC
const OPTION_FLAGS_2: u8 = 0x03;
const TYPE_FLAGS: u8 = 0x00;
const OPTION_FLAGS_3: u8 = 0x00;

/// Fields of a LOGIN7 record the probe fills in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Login {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub app_name: String,
    pub server_name: String,
    pub library: String,
    pub database: String,
}

fn utf16(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

/// Password obfuscation: swap the nibbles of every byte, then XOR with 0xA5
fn obfuscate(password: &str) -> Vec<u8> {
    utf16(password)
        .into_iter()
        .map(|byte| byte.rotate_left(4) ^ 0xA5)
        .collect()
}

impl Login {
    /// Encode the LOGIN7 payload
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        // order of the offset/length table in the fixed part
        let variable: [Vec<u8>; 9] = [
            utf16(&self.hostname),
            utf16(&self.username),
            obfuscate(&self.password),
            utf16(&self.app_name),
            utf16(&self.server_name),
            Vec::new(), // extension
            utf16(&self.library),
            Vec::new(), // language
            utf16(&self.database),
        ];

        let data_len: usize = variable.iter().map(Vec::len).sum();
        let total = FIXED_LEN + data_len;

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&to_u32(total).to_le_bytes());
        out.extend_from_slice(&TDS_VERSION.to_le_bytes());
        out.extend_from_slice(&to_u32(PACKET_SIZE).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // client program version
        out.extend_from_slice(&std::process::id().to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // connection id
        out.extend_from_slice(&[OPTION_FLAGS_1, OPTION_FLAGS_2, TYPE_FLAGS, OPTION_FLAGS_3]);
        out.extend_from_slice(&0i32.to_le_bytes()); // client time zone
        out.extend_from_slice(&0x0409u32.to_le_bytes()); // client LCID, en-US

        let mut offset = FIXED_LEN;
        for field in &variable {
            out.extend_from_slice(&to_u16(offset).to_le_bytes());
            // lengths are in UTF-16 code units
            out.extend_from_slice(&to_u16(field.len() / 2).to_le_bytes());
            offset += field.len();
        }

        out.extend_from_slice(&[0u8; 6]); // client id
        out.extend_from_slice(&to_u16(offset).to_le_bytes()); // SSPI
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&to_u16(offset).to_le_bytes()); // attach db file
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&to_u16(offset).to_le_bytes()); // change password
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // long SSPI

        for field in &variable {
            out.extend_from_slice(field);
        }

        out
    }
}

fn to_u16(value: usize) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
