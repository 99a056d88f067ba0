//! # NMEA0183 XDR Sentence Encoding
//!
//! Builds the transducer measurement sentence chart plotters such as
//! OpenCPN understand:
//!
//! ```text
//! $IIXDR,V,<value>,P,FUEL*<HH>
//! ```
//!
//! - `II` talker (integrated instrumentation), `XDR` sentence type
//! - `V` volume transducer, `P` percent unit
//! - `FUEL` transducer name (use another tag for water or waste tanks)
//!
//! ## Checksum
//!
//! XOR of every byte before the first `*`, skipping `$`. The scan stops
//! after [`CHECKSUM_SCAN_LIMIT`] bytes even if no `*` was found; receivers
//! replicating this exact algorithm depend on that cap, so anything past it
//! is not covered by the checksum. The value is rendered as uppercase hex
//! without zero padding. No CR/LF is appended.

/// Prefix of every XDR volume sentence.
pub const XDR_PREFIX: &str = "$IIXDR,V,";

/// Transducer name used for fuel tanks.
pub const DEFAULT_TRANSDUCER: &str = "FUEL";

/// Maximum number of bytes the checksum scans.
pub const CHECKSUM_SCAN_LIMIT: usize = 80;

/// XOR checksum of `body` up to the first `*`, ignoring `$`.
///
/// # Example
/// ```
/// use tank_level_lib::nmea::checksum;
///
/// assert_eq!(checksum("$IIXDR,V,42,P,FUEL*"), 0x54);
/// ```
pub fn checksum(body: &str) -> u8 {
    body.bytes()
        .take(CHECKSUM_SCAN_LIMIT)
        .take_while(|&b| b != b'*')
        .filter(|&b| b != b'$')
        .fold(0u8, |acc, b| acc ^ b)
}

/// Build a checksummed XDR volume sentence for `value` tagged `transducer_type`.
///
/// # Example
/// ```
/// use tank_level_lib::nmea::{encode_xdr, DEFAULT_TRANSDUCER};
///
/// assert_eq!(encode_xdr("25", DEFAULT_TRANSDUCER), "$IIXDR,V,25,P,FUEL*55");
/// ```
pub fn encode_xdr(value: &str, transducer_type: &str) -> String {
    let mut sentence = String::with_capacity(XDR_PREFIX.len() + value.len() + 16);
    sentence.push_str(XDR_PREFIX);
    sentence.push_str(value);
    sentence.push_str(",P,");
    sentence.push_str(transducer_type);
    sentence.push('*');
    let sum = checksum(&sentence);
    sentence.push_str(&format!("{:X}", sum));
    sentence
}

/// Fuel-tank sentence for a fill percentage.
pub fn encode_fill(fill_percent: u8) -> String {
    encode_xdr(&fill_percent.to_string(), DEFAULT_TRANSDUCER)
}

/// Check that the hex field after `*` matches the body's checksum.
///
/// Returns false when there is no `*` or the field is not valid hex.
pub fn verify(sentence: &str) -> bool {
    let Some((body, field)) = sentence.split_once('*') else {
        return false;
    };
    match u8::from_str_radix(field.trim_end(), 16) {
        Ok(expected) => checksum(body) == expected,
        Err(_) => false,
    }
}
