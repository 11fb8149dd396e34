use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use base64::{engine::general_purpose, Engine as _};

use crate::error::Result;

pub struct Tokenizer {
    id_to_bytes: HashMap<i64, Vec<u8>>,
}

impl Tokenizer {
    /// Reads a `tokens.txt` vocabulary: one `BASE64_TOKEN ID` pair per line.
    /// Lines without an id are numbered by position.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut id_to_bytes = HashMap::new();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let mut parts = line.split_whitespace();
            let Some(raw_token) = parts.next() else {
                continue;
            };
            let id = parts
                .next()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(i as i64);
            id_to_bytes.insert(id, decode_token_bytes(raw_token));
        }

        tracing::debug!(tokens = id_to_bytes.len(), "loaded vocabulary");
        Ok(Self { id_to_bytes })
    }

    pub fn len(&self) -> usize {
        self.id_to_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_bytes.is_empty()
    }

    /// Concatenates token bytes before UTF-8 decoding, since BPE pieces may
    /// split a multi-byte character. Unknown ids and `<|...|>` specials are skipped.
    pub fn decode(&self, ids: &[i64]) -> String {
        let mut all_bytes = Vec::new();
        for id in ids {
            if let Some(bytes) = self.id_to_bytes.get(id) {
                if bytes.len() > 4 && bytes.starts_with(b"<|") && bytes.ends_with(b"|>") {
                    continue;
                }
                all_bytes.extend_from_slice(bytes);
            }
        }
        String::from_utf8_lossy(&all_bytes).into_owned()
    }
}

fn decode_token_bytes(input: &str) -> Vec<u8> {
    if let Ok(bytes) = general_purpose::STANDARD.decode(input) {
        return bytes;
    }
    if let Ok(bytes) = general_purpose::STANDARD_NO_PAD.decode(input) {
        return bytes;
    }
    if let Ok(bytes) = general_purpose::URL_SAFE.decode(input) {
        return bytes;
    }
    if let Ok(bytes) = general_purpose::URL_SAFE_NO_PAD.decode(input) {
        return bytes;
    }
    input.as_bytes().to_vec()
}
