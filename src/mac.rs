//! Parses an IEEE EUI-48 MAC address as written in the config file and
//! renders it the way the router lists its hosts.
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const MAC_TEXT_LEN: usize = 17;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MacError {
    /// Not six two-digit hexadecimal octets
    #[error("invalid length")]
    InvalidLength,

    /// Expected a hyphen or a colon
    #[error("expected a separator at position {0}")]
    ExpectedSeparator(usize),

    /// Hyphens and colons in the same address
    #[error("mixed separators at position {0}")]
    MixedSeparators(usize),
}

impl FromStr for MacAddress {
    type Err = MacError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`, hex digits in any case.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.len() != MAC_TEXT_LEN {
            return Err(MacError::InvalidLength);
        }

        // must contain exactly 12 hexadecimal digits
        if input.chars().filter(|x| x.is_ascii_hexdigit()).count() != 12 {
            return Err(MacError::InvalidLength);
        }

        // every 2nd character must be followed by the same separator
        let mut separator = None;
        let mut it = input.chars().enumerate();
        while let Some((index, c)) = it.nth(2) {
            if c != '-' && c != ':' {
                return Err(MacError::ExpectedSeparator(index));
            }
            match separator {
                None => separator = Some(c),
                Some(s) if s != c => return Err(MacError::MixedSeparators(index)),
                Some(_) => {}
            }
        }

        let mut octets = [0u8; 6];
        for (octet, pair) in octets.iter_mut().zip(input.split(|c: char| c == '-' || c == ':')) {
            *octet = u8::from_str_radix(pair, 16).map_err(|_| MacError::InvalidLength)?;
        }

        Ok(MacAddress(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

#[test]
fn test_mac_gibberish() {
    assert!("hello".parse::<MacAddress>().is_err());
}

#[test]
fn test_mac_invalid_alphabet() {
    assert_eq!(
        "he-js-an-cc-dd-ee".parse::<MacAddress>(),
        Err(MacError::InvalidLength)
    );
}

#[test]
fn test_mac_too_short() {
    assert!("ab-cd".parse::<MacAddress>().is_err());
}

#[test]
fn test_mac_too_long() {
    assert!("ab-cd-ab-cd-ab-cd-ab-cd-ab".parse::<MacAddress>().is_err());
}

#[test]
fn test_mac_separator_mixed() {
    assert_eq!(
        "AA-aa:aa-aa-aa-aa".parse::<MacAddress>(),
        Err(MacError::MixedSeparators(5))
    );
}

#[test]
fn test_mac_separator_order() {
    assert_eq!(
        "-----abababababab".parse::<MacAddress>(),
        Err(MacError::ExpectedSeparator(5))
    );
    assert_eq!(
        "aab:b:cc:dd:ee:ff".parse::<MacAddress>(),
        Err(MacError::ExpectedSeparator(2))
    );
}

#[test]
fn test_mac_surrounding_whitespace() {
    assert_eq!(
        " aa:bb:cc:dd:ee:ff".parse::<MacAddress>(),
        Err(MacError::InvalidLength)
    );
    assert_eq!(
        "aa:bb:cc:dd:ee:ff\n".parse::<MacAddress>(),
        Err(MacError::InvalidLength)
    );
}

#[test]
fn test_mac_normalized() {
    let dashed: MacAddress = "0a-1b-2c-3d-4e-5f".parse().unwrap();
    let colons: MacAddress = "0A:1B:2C:3D:4E:5F".parse().unwrap();

    assert_eq!(dashed, colons);
    assert_eq!(dashed.0, [0x0a, 0x1b, 0x2c, 0x3d, 0x4e, 0x5f]);
    assert_eq!(dashed.to_string(), "0A:1B:2C:3D:4E:5F");
}
