//! Address level codes
//!
//! Levels 1-8 are a stable public contract shared with datasets and the
//! wire protocol:
//!
//! 1 = prefecture, 2 = county, 3 = city / special ward, 4 = ward of a
//! designated city, 5 = oaza, 6 = aza / chome, 7 = block or lot,
//! 8 = building or sub-number.

/// Address level constants.
pub struct AddressLevel;

impl AddressLevel {
    pub const UNDEFINED: i8 = -1;
    pub const PREF: i8 = 1;
    pub const COUNTY: i8 = 2;
    pub const CITY: i8 = 3;
    pub const WARD: i8 = 4;
    pub const OAZA: i8 = 5;
    pub const AZA: i8 = 6;
    pub const BLOCK: i8 = 7;
    pub const BLD: i8 = 8;

    /// Japanese notation of the address level.
    pub fn levelname(level: i8) -> &'static str {
        match level {
            Self::PREF => "都道府県",
            Self::COUNTY => "郡",
            Self::CITY => "市町村・特別区",
            Self::WARD => "政令市の区",
            Self::OAZA => "町域・大字",
            Self::AZA => "丁目・小字",
            Self::BLOCK => "街区・道路・地番",
            Self::BLD => "建物・枝番",
            Self::UNDEFINED => "未定義",
            _ => "不明",
        }
    }
}
