//! Card self-description registers and their rendering.
//!
//! Decoding lives with each register type ([`Cid`], [`Csd`], [`SdStatus`]). Rendering only
//! depends on [`Register::visit_fields`], so an alternative presentation can walk the same fields
//! without touching the decoders.

use core::fmt;

use crate::cid::Cid;
use crate::csd::Csd;
use crate::error::ErrorKind;
use crate::sd_status::SdStatus;

/// A decoded register whose fields can be enumerated by name.
pub trait Register {
    /// Heading printed above the field list.
    fn title(&self) -> &'static str;

    /// Call `visit` once per field, in declaration order, with the field's unsigned value.
    fn visit_fields(&self, visit: &mut dyn FnMut(&'static str, u64));
}

pub fn decode_identification(raw: &[u8]) -> Result<Cid, ErrorKind> {
    Cid::try_from(raw)
}

pub fn decode_geometry(raw: &[u8]) -> Result<Csd, ErrorKind> {
    Csd::try_from(raw)
}

pub fn decode_status(raw: &[u8]) -> Result<SdStatus, ErrorKind> {
    SdStatus::try_from(raw)
}

const RULE: &str = "----------------------------------------";

/// Default text rendering: a title, a rule, one `NAME: 0x<hex>` line per field and a closing rule.
pub struct Formatted<'a, R: Register + ?Sized>(&'a R);

pub fn format<R: Register + ?Sized>(register: &R) -> Formatted<'_, R> {
    Formatted(register)
}

impl<'a, R: Register + ?Sized> fmt::Display for Formatted<'a, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.0.title())?;
        writeln!(f, "{}", RULE)?;
        let mut res = Ok(());
        self.0.visit_fields(&mut |name, value| {
            if res.is_ok() {
                res = writeln!(f, "{}: 0x{:x}", name, value);
            }
        });
        res?;
        write!(f, "{}", RULE)
    }
}
