// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! The reference translator: a pure function over an open
//! `CrankTxn` that rewrites `CapData` payloads between kernel refs and
//! vat-local refs, allocating c-list entries and bumping refcounts as it
//! goes.

use ocap_kernel_core::KernelObject;
use ocap_kernel_core::KernelPromise;
use ocap_kernel_store::CrankTxn;
use ocap_kernel_type::{CapData, Error, KernelObjectId, KernelPromiseId, Kref, Result, VatId, VatRef};

pub struct ReferenceTranslator;

impl ReferenceTranslator {
    /// `importFromVat`: translate a ref the vat just handed the
    /// kernel (as a message target, a syscall slot, ...) into a kref.
    #[tracing::instrument(name = "translator::import_from_vat", level = "trace", skip(txn))]
    pub fn import_from_vat(txn: &mut CrankTxn<'_>, vat: VatId, vat_ref: VatRef) -> Result<Kref> {
        match vat_ref {
            VatRef::ObjectExport(_) | VatRef::PromiseExport(_) => {
                if let Some(kref) = txn.clist(vat).and_then(|c| c.kref_for(vat_ref)) {
                    return Ok(kref);
                }
                let kref = match vat_ref {
                    VatRef::ObjectExport(_) => {
                        let id = txn.allocate_object_id();
                        txn.put_object(id, KernelObject::new(vat, None));
                        Kref::Object(id)
                    }
                    VatRef::PromiseExport(_) => {
                        let id = txn.allocate_promise_id();
                        txn.put_promise(id, KernelPromise::new(vat));
                        Kref::Promise(id)
                    }
                    _ => unreachable!(),
                };
                txn.clist_mut(vat).insert(kref, vat_ref, true);
                Ok(kref)
            }
            VatRef::ObjectImport(_) | VatRef::PromiseImport(_) => txn
                .clist(vat)
                .and_then(|c| c.kref_for(vat_ref))
                .ok_or_else(|| Error::bad_ref(format!("{vat} has no c-list entry for {vat_ref}"))),
            VatRef::Broken => Err(Error::bad_ref("cannot import a broken reference")),
        }
    }

    /// `exportToVat`: translate a kref into the ref this
    /// particular vat should see. Allocates a fresh import entry and bumps
    /// reachable count on first sight; krefs the vat itself owns/decides
    /// always come back as `o+`/`p+`, never `o-`/`p-`.
    #[tracing::instrument(name = "translator::export_to_vat", level = "trace", skip(txn))]
    pub fn export_to_vat(txn: &mut CrankTxn<'_>, vat: VatId, kref: Kref) -> Result<VatRef> {
        if let Some(existing) = txn.clist(vat).and_then(|c| c.vat_ref_for(kref)) {
            return Ok(existing);
        }

        let owned_by_vat = match kref {
            Kref::Object(id) => txn.get_object(id).map(|o| o.owner == Some(vat)).unwrap_or(false),
            Kref::Promise(id) => txn.get_promise(id).map(|p| p.decider == Some(vat)).unwrap_or(false),
        };

        let vat_ref = if owned_by_vat {
            match kref {
                Kref::Object(id) => VatRef::ObjectExport(id.index()),
                Kref::Promise(id) => VatRef::PromiseExport(id.index()),
            }
        } else {
            let idx = txn.allocate_vat_local_import(vat);
            match kref {
                Kref::Object(_) => VatRef::ObjectImport(idx),
                Kref::Promise(_) => VatRef::PromiseImport(idx),
            }
        };

        txn.clist_mut(vat).insert(kref, vat_ref, true);
        if let Kref::Object(id) = kref {
            bump_reachable(txn, id);
        }
        Ok(vat_ref)
    }

    /// Like `export_to_vat`, but for slots inside a promise resolution:
    /// a retired object is substituted with `broken`
    /// instead of failing the whole translation, since a resolution slot
    /// is data, not a send target.
    pub fn export_resolution_slot(txn: &mut CrankTxn<'_>, vat: VatId, kref: Kref) -> Result<VatRef> {
        if let Kref::Object(id) = kref {
            if txn.get_object(id).map(|o| o.is_retired()).unwrap_or(true) {
                return Ok(VatRef::Broken);
            }
        }
        Self::export_to_vat(txn, vat, kref)
    }

    /// Translate an inbound syscall/message payload (vat refs -> krefs).
    pub fn translate_message_to_kernel(txn: &mut CrankTxn<'_>, vat: VatId, args: CapData<VatRef>) -> Result<CapData<Kref>> {
        args.map_slots(|vat_ref| Self::import_from_vat(txn, vat, vat_ref))
    }

    /// Translate an outbound delivery payload (krefs -> vat refs). Fails
    /// the send if the message *target* resolves to a retired object; for
    /// argument/result slots this still succeeds and does not substitute
    /// `broken` — only resolution payloads do that.
    pub fn translate_message_to_vat(txn: &mut CrankTxn<'_>, vat: VatId, args: CapData<Kref>) -> Result<CapData<VatRef>> {
        args.map_slots(|kref| Self::export_to_vat(txn, vat, kref))
    }

    /// Translate a resolution payload (krefs -> vat refs) for one
    /// subscriber, substituting `broken` for retired objects.
    pub fn translate_resolution_to_vat(txn: &mut CrankTxn<'_>, vat: VatId, value: CapData<Kref>) -> Result<CapData<VatRef>> {
        value.map_slots(|kref| Self::export_resolution_slot(txn, vat, kref))
    }

    pub fn resolve_send_target(txn: &CrankTxn<'_>, kref: Kref) -> Result<()> {
        if let Kref::Object(id) = kref {
            match txn.get_object(id) {
                Some(obj) if obj.is_retired() => {
                    return Err(Error::bad_ref(format!("{id} is retired, target invalid")));
                }
                None => return Err(Error::bad_ref(format!("{id} does not exist"))),
                _ => {}
            }
        }
        Ok(())
    }
}

fn bump_reachable(txn: &mut CrankTxn<'_>, id: KernelObjectId) {
    if let Some(obj) = txn.object_mut(id) {
        obj.reachable_count += 1;
        if obj.recognizable_count < obj.reachable_count {
            obj.recognizable_count = obj.reachable_count;
        }
    }
}

#[cfg(test)]
mod tests {
    use ocap_kernel_store::KernelStore;

    use super::*;

    #[test]
    fn round_trip_translation_preserves_kref() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let vat = VatId(1);

        let kref = ReferenceTranslator::import_from_vat(&mut txn, vat, VatRef::ObjectExport(7)).unwrap();
        let back = ReferenceTranslator::import_from_vat(&mut txn, vat, VatRef::ObjectExport(7)).unwrap();
        assert_eq!(kref, back);
    }

    #[test]
    fn duplicate_slots_translate_to_the_same_vat_ref() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let owner = VatId(1);
        let importer = VatId(2);

        let kref = ReferenceTranslator::import_from_vat(&mut txn, owner, VatRef::ObjectExport(1)).unwrap();
        let data = CapData::new(vec![], vec![kref, kref]);
        let translated = ReferenceTranslator::translate_message_to_vat(&mut txn, importer, data).unwrap();
        assert_eq!(translated.slots[0], translated.slots[1]);
    }

    #[test]
    fn importing_an_unknown_import_ref_is_bad_ref() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let err = ReferenceTranslator::import_from_vat(&mut txn, VatId(1), VatRef::ObjectImport(99)).unwrap_err();
        assert_eq!(err.kind(), ocap_kernel_type::ErrorKind::BadRef);
    }

    #[test]
    fn owner_always_sees_plus_form() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let owner = VatId(1);
        let kref = ReferenceTranslator::import_from_vat(&mut txn, owner, VatRef::PromiseExport(3)).unwrap();
        let vat_ref = ReferenceTranslator::export_to_vat(&mut txn, owner, kref).unwrap();
        assert!(vat_ref.is_export());
    }

    #[test]
    fn non_owner_sees_minus_form() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let owner = VatId(1);
        let other = VatId(2);
        let kref = ReferenceTranslator::import_from_vat(&mut txn, owner, VatRef::PromiseExport(3)).unwrap();
        let vat_ref = ReferenceTranslator::export_to_vat(&mut txn, other, kref).unwrap();
        assert!(!vat_ref.is_export());
    }

    #[test]
    fn retired_object_in_resolution_becomes_broken() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let owner = VatId(1);
        let subscriber = VatId(2);

        let kref = ReferenceTranslator::import_from_vat(&mut txn, owner, VatRef::ObjectExport(1)).unwrap();
        if let Kref::Object(id) = kref {
            txn.object_mut(id).unwrap().retire();
        }

        let value = CapData::new(vec![], vec![kref]);
        let translated = ReferenceTranslator::translate_resolution_to_vat(&mut txn, subscriber, value).unwrap();
        assert_eq!(translated.slots[0], VatRef::Broken);
    }

    #[test]
    fn retired_object_as_send_target_is_rejected() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let owner = VatId(1);
        let kref = ReferenceTranslator::import_from_vat(&mut txn, owner, VatRef::ObjectExport(1)).unwrap();
        if let Kref::Object(id) = kref {
            txn.object_mut(id).unwrap().retire();
        }
        let err = ReferenceTranslator::resolve_send_target(&txn, kref).unwrap_err();
        assert_eq!(err.kind(), ocap_kernel_type::ErrorKind::BadRef);
    }
}
