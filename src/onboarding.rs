//! Onboarding payload decoding (QR code `MT:...` and manual pairing code).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const QR_PREFIX: &str = "MT:";

const BASE38_ALPHABET: &[u8; 38] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-.";
const QR_PACKED_LEN: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommissioningFlow {
    #[default]
    Standard,
    UserIntent,
    Custom,
}

impl CommissioningFlow {
    fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(Self::Standard),
            1 => Ok(Self::UserIntent),
            2 => Ok(Self::Custom),
            v => Err(Error::InvalidPayload(format!("reserved commissioning flow {}", v))),
        }
    }
}

impl fmt::Display for CommissioningFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Standard => "standard",
            Self::UserIntent => "user-intent",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Discovery capability bits carried by QR payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiscoveryCapabilities(pub u8);

impl DiscoveryCapabilities {
    pub fn soft_ap(&self) -> bool {
        self.0 & 1 != 0
    }
    pub fn ble(&self) -> bool {
        self.0 & 2 != 0
    }
    pub fn on_network(&self) -> bool {
        self.0 & 4 != 0
    }
}

/// Identity fields shared by both payload forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OnboardingIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// 12-bit discriminator; manual codes only carry its upper four bits.
    pub discriminator: u16,
    pub passcode: u32,
    pub flow: CommissioningFlow,
}

impl fmt::Display for OnboardingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vendor=0x{:04X} product=0x{:04X} discriminator={} flow={}",
            self.vendor_id, self.product_id, self.discriminator, self.flow
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Qr,
    Pairing,
}

impl PayloadKind {
    pub fn tag(&self) -> &'static str {
        match self {
            PayloadKind::Qr => "qr",
            PayloadKind::Pairing => "pairing",
        }
    }
}

/// Parsed onboarding payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingPayload {
    pub identity: OnboardingIdentity,
    pub kind: PayloadKind,
    /// Only present for QR payloads.
    pub capabilities: Option<DiscoveryCapabilities>,
    /// Normalized input string.
    pub raw: String,
}

impl OnboardingPayload {
    pub fn is_qr(&self) -> bool {
        self.kind == PayloadKind::Qr
    }
}

/// Parse QR (`MT:` prefixed) or manual pairing code. Returns payload and whether it was a QR code.
pub fn parse_onboarding_payload(raw: &str) -> Result<(OnboardingPayload, bool)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::InvalidPayload("payload is required".to_owned()));
    }
    let payload = if raw.starts_with(QR_PREFIX) {
        decode_qr_code(raw)?
    } else {
        decode_manual_pairing_code(raw)?
    };
    let is_qr = payload.is_qr();
    Ok((payload, is_qr))
}

fn base38_value(c: u8) -> Result<u32> {
    BASE38_ALPHABET
        .iter()
        .position(|a| *a == c)
        .map(|p| p as u32)
        .ok_or_else(|| Error::InvalidPayload(format!("invalid base38 character '{}'", c as char)))
}

fn base38_decode(s: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 3 / 5 + 2);
    for chunk in s.as_bytes().chunks(5) {
        let byte_count = match chunk.len() {
            5 => 3,
            4 => 2,
            2 => 1,
            n => {
                return Err(Error::InvalidPayload(format!(
                    "invalid base38 chunk length {}",
                    n
                )))
            }
        };
        let mut value: u32 = 0;
        for c in chunk.iter().rev() {
            value = value * 38 + base38_value(*c)?;
        }
        if value >> (8 * byte_count) != 0 {
            return Err(Error::InvalidPayload("base38 chunk overflow".to_owned()));
        }
        for i in 0..byte_count {
            out.push((value >> (8 * i)) as u8);
        }
    }
    Ok(out)
}

struct BitReader {
    value: u128,
}

impl BitReader {
    fn take(&mut self, bits: u32) -> u128 {
        let v = self.value & ((1u128 << bits) - 1);
        self.value >>= bits;
        v
    }
}

pub fn decode_qr_code(code: &str) -> Result<OnboardingPayload> {
    let body = code
        .strip_prefix(QR_PREFIX)
        .ok_or_else(|| Error::InvalidPayload(format!("missing {} prefix", QR_PREFIX)))?;
    // concatenated payloads: first one wins
    let body = body.split('*').next().unwrap_or_default();
    let bytes = base38_decode(body)?;
    if bytes.len() < QR_PACKED_LEN {
        return Err(Error::InvalidPayload(format!(
            "qr payload too short ({} bytes)",
            bytes.len()
        )));
    }
    let mut packed = [0u8; 16];
    packed[..QR_PACKED_LEN].copy_from_slice(&bytes[..QR_PACKED_LEN]);
    let mut bits = BitReader {
        value: u128::from_le_bytes(packed),
    };

    let version = bits.take(3) as u8;
    if version != 0 {
        return Err(Error::InvalidPayload(format!("unsupported qr version {}", version)));
    }
    let vendor_id = bits.take(16) as u16;
    let product_id = bits.take(16) as u16;
    let flow = CommissioningFlow::from_bits(bits.take(2) as u8)?;
    let capabilities = DiscoveryCapabilities(bits.take(8) as u8);
    let discriminator = bits.take(12) as u16;
    let passcode = bits.take(27) as u32;
    check_passcode(passcode)?;

    Ok(OnboardingPayload {
        identity: OnboardingIdentity {
            vendor_id,
            product_id,
            discriminator,
            passcode,
            flow,
        },
        kind: PayloadKind::Qr,
        capabilities: Some(capabilities),
        raw: code.to_owned(),
    })
}

pub fn decode_manual_pairing_code(code: &str) -> Result<OnboardingPayload> {
    let norm: String = code.chars().filter(|c| *c != '-' && *c != ' ').collect();
    if !norm.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidPayload(format!(
            "pairing code must be decimal digits: {}",
            code
        )));
    }
    if norm.len() != 11 && norm.len() != 21 {
        return Err(Error::InvalidPayload(format!(
            "pairing code must have 11 or 21 digits, got {}",
            norm.len()
        )));
    }
    let (digits, check) = norm.split_at(norm.len() - 1);
    if verhoeff_check_digit(digits) != check.as_bytes()[0] - b'0' {
        return Err(Error::InvalidPayload(format!("pairing code check digit mismatch: {}", code)));
    }

    let parse = |s: &str| -> Result<u32> {
        s.parse::<u32>()
            .map_err(|e| Error::InvalidPayload(format!("pairing code chunk {}: {}", s, e)))
    };
    let first = parse(&norm[0..1])?;
    let second = parse(&norm[1..6])?;
    let third = parse(&norm[6..10])?;
    if first > 7 {
        return Err(Error::InvalidPayload(format!("unsupported pairing code version in {}", code)));
    }
    if second > 0xffff || third > 0x1fff {
        return Err(Error::InvalidPayload(format!("pairing code chunk out of range in {}", code)));
    }
    let long = first & 4 != 0;
    if long != (norm.len() == 21) {
        return Err(Error::InvalidPayload(format!(
            "pairing code length does not match vendor/product flag: {}",
            code
        )));
    }
    let passcode = (second & 0x3fff) | (third << 14);
    let discriminator = (((first & 3) << 10) | ((second >> 6) & 0x300)) as u16;
    check_passcode(passcode)?;

    let (vendor_id, product_id, flow) = if long {
        let vendor = parse(&norm[10..15])?;
        let product = parse(&norm[15..20])?;
        if vendor > 0xffff || product > 0xffff {
            return Err(Error::InvalidPayload(format!(
                "vendor/product out of range in {}",
                code
            )));
        }
        (vendor as u16, product as u16, CommissioningFlow::Custom)
    } else {
        (0, 0, CommissioningFlow::Standard)
    };

    Ok(OnboardingPayload {
        identity: OnboardingIdentity {
            vendor_id,
            product_id,
            discriminator,
            passcode,
            flow,
        },
        kind: PayloadKind::Pairing,
        capabilities: None,
        raw: norm,
    })
}

fn check_passcode(passcode: u32) -> Result<()> {
    const TRIVIAL: [u32; 12] = [
        0, 11111111, 22222222, 33333333, 44444444, 55555555, 66666666, 77777777, 88888888,
        99999999, 12345678, 87654321,
    ];
    if passcode > 99999998 || TRIVIAL.contains(&passcode) {
        return Err(Error::InvalidPayload(format!("invalid passcode {}", passcode)));
    }
    Ok(())
}

const VERHOEFF_D: [[u8; 10]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 2, 3, 4, 0, 6, 7, 8, 9, 5],
    [2, 3, 4, 0, 1, 7, 8, 9, 5, 6],
    [3, 4, 0, 1, 2, 8, 9, 5, 6, 7],
    [4, 0, 1, 2, 3, 9, 5, 6, 7, 8],
    [5, 9, 8, 7, 6, 0, 4, 3, 2, 1],
    [6, 5, 9, 8, 7, 1, 0, 4, 3, 2],
    [7, 6, 5, 9, 8, 2, 1, 0, 4, 3],
    [8, 7, 6, 5, 9, 3, 2, 1, 0, 4],
    [9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
];

const VERHOEFF_P: [[u8; 10]; 8] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 5, 7, 6, 2, 8, 3, 0, 9, 4],
    [5, 8, 0, 3, 7, 9, 6, 1, 4, 2],
    [8, 9, 1, 6, 0, 4, 3, 5, 2, 7],
    [9, 4, 5, 3, 1, 2, 6, 8, 7, 0],
    [4, 2, 8, 6, 5, 7, 3, 9, 0, 1],
    [2, 7, 9, 3, 8, 0, 6, 4, 1, 5],
    [7, 0, 4, 6, 9, 1, 3, 2, 5, 8],
];

const VERHOEFF_INV: [u8; 10] = [0, 4, 3, 2, 1, 5, 6, 7, 8, 9];

/// Verhoeff check digit for a string of decimal digits.
fn verhoeff_check_digit(digits: &str) -> u8 {
    let mut c = 0u8;
    for (i, b) in digits.bytes().rev().enumerate() {
        let d = (b - b'0') as usize;
        c = VERHOEFF_D[c as usize][VERHOEFF_P[(i + 1) % 8][d] as usize];
    }
    VERHOEFF_INV[c as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_1() {
        let res = decode_manual_pairing_code("2585-103-3238").unwrap();
        assert_eq!(res.identity.discriminator, 2816);
        assert_eq!(res.identity.passcode, 54453390);
    }

    #[test]
    pub fn test_2() {
        let res = decode_manual_pairing_code("34970112332").unwrap();
        assert_eq!(res.identity.discriminator, 3840);
        assert_eq!(res.identity.passcode, 20202021);
        assert_eq!(res.identity.flow, CommissioningFlow::Standard);
        assert_eq!(res.identity.vendor_id, 0);
    }

    #[test]
    fn manual_with_vendor_product() {
        let res = decode_manual_pairing_code("755668082804660221362").unwrap();
        assert_eq!(res.identity.vendor_id, 0x1234);
        assert_eq!(res.identity.product_id, 0x5678);
        assert_eq!(res.identity.discriminator, 3840);
        assert_eq!(res.identity.passcode, 13572468);
        assert_eq!(res.identity.flow, CommissioningFlow::Custom);
    }

    #[test]
    fn manual_check_digit() {
        assert!(matches!(
            decode_manual_pairing_code("34970112331"),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn qr_reference_payload() {
        let res = decode_qr_code("MT:Y.K9042C00KA0648G00").unwrap();
        assert_eq!(res.identity.vendor_id, 0xFFF1);
        assert_eq!(res.identity.product_id, 0x8000);
        assert_eq!(res.identity.discriminator, 3840);
        assert_eq!(res.identity.passcode, 20202021);
        assert!(res.capabilities.unwrap().ble());
    }

    #[test]
    fn qr_custom_flow() {
        let res = decode_qr_code("MT:CS.16RO412R-.548G00").unwrap();
        assert_eq!(res.identity.flow, CommissioningFlow::Custom);
        assert_eq!(res.identity.discriminator, 250);
        assert!(res.capabilities.unwrap().on_network());
    }

    #[test]
    fn qr_rejects_bad_input() {
        // trivial passcode 12345678
        assert!(decode_qr_code("MT:Y.K9042C004QG46Y900").is_err());
        // version 1
        assert!(decode_qr_code("MT:B3L90SC112R-.548G00").is_err());
        assert!(decode_qr_code("MT:Y.K9").is_err());
        assert!(decode_qr_code("MT:Y.K9042C00KA0648G0a").is_err());
    }

    #[test]
    fn qr_rejects_chunk_over_24_bits() {
        // "MLBB8" decodes to 0x1000000 plus the value of "Y.K90"
        assert!(matches!(
            decode_qr_code("MT:MLBB842C00KA0648G00"),
            Err(Error::InvalidPayload(_))
        ));
        assert!(matches!(base38_decode("....."), Err(Error::InvalidPayload(_))));
        assert_eq!(base38_decode("Y.K90").unwrap().len(), 3);
    }

    #[test]
    fn parse_dispatches_on_prefix() {
        let (p, is_qr) = parse_onboarding_payload("  MT:Y.K9042C00KA0648G00 ").unwrap();
        assert!(is_qr);
        assert_eq!(p.raw, "MT:Y.K9042C00KA0648G00");
        let (_, is_qr) = parse_onboarding_payload("3497-011-2332").unwrap();
        assert!(!is_qr);
        assert!(matches!(parse_onboarding_payload(""), Err(Error::InvalidPayload(_))));
        assert!(matches!(parse_onboarding_payload("hello"), Err(Error::InvalidPayload(_))));
    }
}
