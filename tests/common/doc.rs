//! Client-side replica, editing the shared `content` text like an editor would.

#![allow(dead_code)]

use collab_proto::Payload;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Text, Transact, Update, WriteTxn};

pub struct ClientDoc {
    doc: Doc,
}

impl ClientDoc {
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Rebuild from a stored snapshot.
    pub fn from_snapshot(snapshot: &[u8]) -> Self {
        let doc = Self::new();
        doc.apply_bytes(snapshot);
        doc
    }

    /// Append `s` and return the resulting incremental update.
    pub fn push(&self, s: &str) -> Payload {
        let before = self.doc.transact().state_vector();
        {
            let mut txn = self.doc.transact_mut();
            let text = txn.get_or_insert_text("content");
            text.push(&mut txn, s);
        }
        Payload::from(self.doc.transact().encode_diff_v1(&before))
    }

    pub fn apply(&self, update: &Payload) {
        self.apply_bytes(update.as_bytes());
    }

    fn apply_bytes(&self, bytes: &[u8]) {
        let update = Update::decode_v1(bytes).unwrap();
        self.doc.transact_mut().apply_update(update).unwrap();
    }

    pub fn state_vector(&self) -> Payload {
        Payload::from(self.doc.transact().state_vector().encode_v1())
    }

    /// What a peer with `remote_sv` is missing.
    pub fn diff(&self, remote_sv: &Payload) -> Payload {
        let sv = StateVector::decode_v1(remote_sv.as_bytes()).unwrap();
        Payload::from(self.doc.transact().encode_diff_v1(&sv))
    }

    /// Whether this replica has never seen an edit.
    pub fn is_empty(&self) -> bool {
        self.doc.transact().state_vector().is_empty()
    }

    pub fn content(&self) -> String {
        let txn = self.doc.transact();
        txn.get_text("content")
            .map(|text| text.get_string(&txn))
            .unwrap_or_default()
    }
}
