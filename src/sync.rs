//! Cache-reconciliation engine.
//!
//! The engine is owned by the connection loop and mutated only from the
//! session read path, so frames are applied strictly in arrival order. The
//! cache starts unset and is re-armed on every (re)connect: the first frame
//! after an open must be a snapshot, and a patch against an unset cache is a
//! protocol violation.

use serde_json::Value;
use tokio::sync::watch;

use crate::Result;
use crate::error::Error;
use crate::types::{CacheDocument, Mode, Subject};
use crate::{codec, patch};

/// Reconstructs the mirrored document from snapshot and patch frames.
pub struct SyncEngine {
    subject: Subject,
    cache: Option<Value>,
    cache_tx: watch::Sender<Option<CacheDocument>>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(subject: Subject, cache_tx: watch::Sender<Option<CacheDocument>>) -> Self {
        Self {
            subject,
            cache: None,
            cache_tx,
        }
    }

    /// Drop the mirrored state ahead of a fresh snapshot.
    ///
    /// Called on every successful open; the snapshot that follows is the
    /// resynchronization baseline.
    pub fn reset(&mut self) {
        self.cache = None;
        _ = self.cache_tx.send(None);
    }

    /// Apply one incoming frame and return the resulting document.
    ///
    /// The returned value (and the one published to the cache watch channel)
    /// is an owned copy; consumer mutation cannot reach the internal cache.
    pub fn handle(&mut self, bytes: &[u8]) -> Result<CacheDocument> {
        match self.subject.mode() {
            None => self.handle_time(bytes),
            Some(mode) => self.handle_keyed(mode, bytes),
        }
    }

    /// Time-stream frames are bare integer timestamps, no envelope.
    fn handle_time(&mut self, bytes: &[u8]) -> Result<CacheDocument> {
        let text = codec::text_from_binary(bytes)?;
        let stamp: i64 = text
            .trim()
            .parse()
            .map_err(|_| Error::protocol(format!("time frame is not an integer: {text:?}")))?;

        let doc = CacheDocument::Time(stamp);
        _ = self.cache_tx.send(Some(doc.clone()));
        Ok(doc)
    }

    fn handle_keyed(&mut self, mode: Mode, bytes: &[u8]) -> Result<CacheDocument> {
        let frame = codec::decode_frame(bytes)?;

        if frame.snapshot {
            let doc = codec::decode_snapshot(mode, &frame.data)?;
            tracing::debug!(%mode, "snapshot replaced cache");
            self.cache = Some(doc);
        } else {
            let current = self
                .cache
                .as_ref()
                .ok_or_else(|| Error::protocol("patch frame received before any snapshot"))?;
            let ops = codec::decode_ops(&frame.data)?;

            // All-or-nothing: apply against a working copy so a failing
            // sequence leaves the cache at state N, never in between.
            let mut next = current.clone();
            patch::apply(&mut next, &ops)?;
            tracing::trace!(%mode, ops = ops.len(), "patch sequence applied");
            self.cache = Some(next);
        }

        let doc = self.document(mode)?;
        _ = self.cache_tx.send(Some(doc.clone()));
        Ok(doc)
    }

    fn document(&self, mode: Mode) -> Result<CacheDocument> {
        let value = self
            .cache
            .as_ref()
            .ok_or_else(|| Error::protocol("cache is unset"))?;
        Ok(match mode {
            Mode::Single => CacheDocument::Single(serde_json::from_value(value.clone())?),
            Mode::Multi => CacheDocument::Multi(serde_json::from_value(value.clone())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::{Value, json};

    use super::*;
    use crate::codec::encode_payload;

    fn engine(subject: Subject) -> (SyncEngine, watch::Receiver<Option<CacheDocument>>) {
        let (tx, rx) = watch::channel(None);
        (SyncEngine::new(subject, tx), rx)
    }

    fn snapshot_frame(doc: &Value) -> Vec<u8> {
        json!({"snapshot": true, "data": STANDARD.encode(doc.to_string())})
            .to_string()
            .into_bytes()
    }

    fn empty_snapshot_frame() -> Vec<u8> {
        json!({"snapshot": true, "data": ""}).to_string().into_bytes()
    }

    fn patch_frame(ops: &Value) -> Vec<u8> {
        json!({"snapshot": false, "data": STANDARD.encode(ops.to_string())})
            .to_string()
            .into_bytes()
    }

    fn wire_entry(index: &str, created: i64, updated: i64, data: &Value) -> Value {
        json!({
            "created": created,
            "updated": updated,
            "index": index,
            "data": encode_payload(data),
        })
    }

    #[test]
    fn snapshot_replaces_cache_wholesale() {
        let (mut engine, rx) = engine(Subject::single("box"));

        let first = engine
            .handle(&snapshot_frame(&wire_entry("box", 1, 0, &json!({"n": 1}))))
            .unwrap();
        assert_eq!(first.as_single().unwrap().data, json!({"n": 1}));

        // A later snapshot wins over whatever was cached before.
        let second = engine
            .handle(&snapshot_frame(&wire_entry("box", 2, 0, &json!({"n": 2}))))
            .unwrap();
        let entry = second.as_single().unwrap();
        assert_eq!(entry.created, 2);
        assert_eq!(entry.data, json!({"n": 2}));
        assert_eq!(*rx.borrow(), Some(second));
    }

    #[test]
    fn empty_snapshot_yields_empty_entry() {
        let (mut engine, _rx) = engine(Subject::single("box"));
        let doc = engine.handle(&empty_snapshot_frame()).unwrap();
        assert_eq!(doc.as_single().unwrap(), &crate::types::Entry::empty());
    }

    #[test]
    fn patch_before_snapshot_is_a_protocol_violation() {
        let (mut engine, _rx) = engine(Subject::single("box"));
        let error = engine
            .handle(&patch_frame(&json!([
                {"op": "replace", "path": "/updated", "value": 9}
            ])))
            .unwrap_err();
        assert_eq!(error.kind(), crate::error::Kind::Protocol);
    }

    #[test]
    fn patch_sequence_matches_equivalent_snapshot() {
        let (mut patched, _rx1) = engine(Subject::single("box"));
        let (mut snapshotted, _rx2) = engine(Subject::single("box"));

        patched
            .handle(&snapshot_frame(&wire_entry("box", 100, 0, &json!({"name": "a box"}))))
            .unwrap();
        let via_patch = patched
            .handle(&patch_frame(&json!([
                {"op": "replace", "path": "/data", "value": encode_payload(&json!({"name": "still a box"}))},
                {"op": "replace", "path": "/updated", "value": 200},
            ])))
            .unwrap();

        let via_snapshot = snapshotted
            .handle(&snapshot_frame(&wire_entry(
                "box",
                100,
                200,
                &json!({"name": "still a box"}),
            )))
            .unwrap();

        assert_eq!(via_patch, via_snapshot);
    }

    #[test]
    fn failing_patch_leaves_cache_untouched() {
        let (mut engine, rx) = engine(Subject::multi("box/*"));

        engine
            .handle(&snapshot_frame(&json!([
                wire_entry("box/1", 1, 0, &json!({"n": 1}))
            ])))
            .unwrap();
        let before = rx.borrow().clone();

        // Second op is inapplicable; the first must not stick.
        let error = engine
            .handle(&patch_frame(&json!([
                {"op": "remove", "path": "/0"},
                {"op": "remove", "path": "/7"},
            ])))
            .unwrap_err();
        assert_eq!(error.kind(), crate::error::Kind::Protocol);
        assert_eq!(*rx.borrow(), before);
    }

    #[test]
    fn multi_add_and_remove_drive_sequence_length() {
        let (mut engine, _rx) = engine(Subject::multi("box/*"));

        let doc = engine.handle(&empty_snapshot_frame()).unwrap();
        assert!(doc.as_multi().unwrap().is_empty());

        let doc = engine
            .handle(&patch_frame(&json!([{
                "op": "add",
                "path": "/-",
                "value": wire_entry("box/a1", 5, 0, &json!({"name": "something"})),
            }])))
            .unwrap();
        let entries = doc.as_multi().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].index, "box/a1");
        assert_eq!(entries[0].data, json!({"name": "something"}));

        let doc = engine
            .handle(&patch_frame(&json!([{"op": "remove", "path": "/0"}])))
            .unwrap();
        assert!(doc.as_multi().unwrap().is_empty());
    }

    #[test]
    fn reset_requires_a_new_snapshot() {
        let (mut engine, rx) = engine(Subject::single("box"));
        engine
            .handle(&snapshot_frame(&wire_entry("box", 1, 0, &json!({}))))
            .unwrap();

        engine.reset();
        assert_eq!(*rx.borrow(), None);

        let error = engine
            .handle(&patch_frame(&json!([
                {"op": "replace", "path": "/updated", "value": 9}
            ])))
            .unwrap_err();
        assert_eq!(error.kind(), crate::error::Kind::Protocol);
    }

    #[test]
    fn time_frames_bypass_the_envelope() {
        let (mut engine, rx) = engine(Subject::Time);
        let doc = engine.handle(b"1631123456789").unwrap();
        assert_eq!(doc.as_time(), Some(1_631_123_456_789));
        assert_eq!(rx.borrow().as_ref().unwrap().as_time(), Some(1_631_123_456_789));

        let error = engine.handle(b"not a number").unwrap_err();
        assert_eq!(error.kind(), crate::error::Kind::Protocol);
    }
}
