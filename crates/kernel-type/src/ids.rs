// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Opaque, prefixed identifiers. Every id is a one-letter
//! namespace prefix followed by a monotonically increasing decimal index,
//! allocated from a counter persisted in the store.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

macro_rules! scalar_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            pub fn index(self) -> u64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let rest = s
                    .strip_prefix($prefix)
                    .ok_or_else(|| Error::bad_ref(format!("expected {} id, got {:?}", $prefix, s)))?;
                let index: u64 =
                    rest.parse().map_err(|_| Error::bad_ref(format!("malformed id {:?}", s)))?;
                Ok($name(index))
            }
        }
    };
}

scalar_id!(VatId, "v");
scalar_id!(SubclusterId, "s");
scalar_id!(KernelObjectId, "ko");
scalar_id!(KernelPromiseId, "kp");

/// A kernel-wide reference: either to an object (`koN`) or a promise (`kpN`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kref {
    Object(KernelObjectId),
    Promise(KernelPromiseId),
}

impl Display for Kref {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Kref::Object(ko) => Display::fmt(ko, f),
            Kref::Promise(kp) => Display::fmt(kp, f),
        }
    }
}

impl FromStr for Kref {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("ko") {
            Ok(Kref::Object(s.parse()?))
        } else if s.starts_with("kp") {
            Ok(Kref::Promise(s.parse()?))
        } else {
            Err(Error::bad_ref(format!("not a kref: {:?}", s)))
        }
    }
}

impl Kref {
    pub fn as_object(self) -> Option<KernelObjectId> {
        match self {
            Kref::Object(ko) => Some(ko),
            Kref::Promise(_) => None,
        }
    }

    pub fn as_promise(self) -> Option<KernelPromiseId> {
        match self {
            Kref::Promise(kp) => Some(kp),
            Kref::Object(_) => None,
        }
    }
}

/// A vat-local reference, as seen by the vat the kref is translated for.
/// `+` forms are exports decided/owned by the vat itself; `-`
/// forms are imports of something owned elsewhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VatRef {
    ObjectExport(u64),
    ObjectImport(u64),
    PromiseExport(u64),
    PromiseImport(u64),
    /// Substituted for a slot whose backing object has been retired, when
    /// the slot appears in a resolution rather than as a message target.
    Broken,
}

impl VatRef {
    pub fn is_object(self) -> bool {
        matches!(self, VatRef::ObjectExport(_) | VatRef::ObjectImport(_))
    }

    pub fn is_promise(self) -> bool {
        matches!(self, VatRef::PromiseExport(_) | VatRef::PromiseImport(_))
    }

    /// `true` for the `+` forms: things decided/owned by this vat.
    pub fn is_export(self) -> bool {
        matches!(self, VatRef::ObjectExport(_) | VatRef::PromiseExport(_))
    }
}

impl Display for VatRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VatRef::ObjectExport(n) => write!(f, "o+{n}"),
            VatRef::ObjectImport(n) => write!(f, "o-{n}"),
            VatRef::PromiseExport(n) => write!(f, "p+{n}"),
            VatRef::PromiseImport(n) => write!(f, "p-{n}"),
            VatRef::Broken => f.write_str("broken"),
        }
    }
}

impl FromStr for VatRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "broken" {
            return Ok(VatRef::Broken);
        }
        let (head, rest) = s.split_at(s.len().min(2));
        let parse_index = |rest: &str| -> Result<u64, Error> {
            rest.parse().map_err(|_| Error::bad_ref(format!("malformed vat ref {:?}", s)))
        };
        match head {
            "o+" => Ok(VatRef::ObjectExport(parse_index(rest)?)),
            "o-" => Ok(VatRef::ObjectImport(parse_index(rest)?)),
            "p+" => Ok(VatRef::PromiseExport(parse_index(rest)?)),
            "p-" => Ok(VatRef::PromiseImport(parse_index(rest)?)),
            _ => Err(Error::bad_ref(format!("not a vat ref: {:?}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_object_id_round_trips() {
        let ko = KernelObjectId(42);
        assert_eq!(ko.to_string(), "ko42");
        assert_eq!("ko42".parse::<KernelObjectId>().unwrap(), ko);
    }

    #[test]
    fn vat_ref_round_trips_all_forms() {
        for r in [
            VatRef::ObjectExport(1),
            VatRef::ObjectImport(2),
            VatRef::PromiseExport(3),
            VatRef::PromiseImport(4),
        ] {
            let s = r.to_string();
            assert_eq!(s.parse::<VatRef>().unwrap(), r);
        }
    }

    #[test]
    fn kref_rejects_garbage() {
        assert!("xo1".parse::<Kref>().is_err());
    }

    #[test]
    fn vat_ref_export_flag() {
        assert!(VatRef::ObjectExport(1).is_export());
        assert!(!VatRef::ObjectImport(1).is_export());
    }
}
