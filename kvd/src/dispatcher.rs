//! Turns an inbound client [`Message`] into the response (if any) it
//! provokes from the [`Store`].
//!
//! Kept as a thin, synchronous function rather than a struct: the store
//! already does all the locking/atomics work, so there's no per-connection
//! state for a "dispatcher" object to own.

use std::sync::Arc;

use kv_protocol::Message;
use kv_store::Store;

/// Apply `message` to `store`, returning the response to write back to the
/// client, if the message kind has one.
///
/// `GET` always produces a `GET_RESPONSE`, using [`kv_protocol::NOT_FOUND`]
/// and zeroed counters on a miss. `SET` never produces a response.
pub fn dispatch(store: &Arc<Store>, message: Message) -> Option<Message> {
    match message {
        Message::Get { request_id, key } => {
            let response = match store.get(&key) {
                Some(view) => Message::GetResponse {
                    request_id,
                    key,
                    value: (*view.value()).clone(),
                    reads: view.reads(),
                    writes: view.writes(),
                },
                None => Message::GetResponse {
                    request_id,
                    key,
                    value: kv_protocol::not_found_bytes(),
                    reads: 0,
                    writes: 0,
                },
            };
            Some(response)
        }
        Message::Set { key, value } => {
            store.set(key, value);
            None
        }
        Message::GetResponse { .. } => {
            // A server never receives this variant: `parse_server` rejects
            // it before `dispatch` is ever called.
            unreachable!("server dispatcher received a client-direction-only message")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    fn store() -> Arc<Store> {
        let dir = tempdir().expect("tempdir");
        Arc::new(Store::open(dir.path().join("config.dat")).expect("open"))
    }

    #[test]
    fn get_hit_echoes_request_id_and_key() {
        let store = store();
        store.set("alpha", "one");

        let response = dispatch(
            &store,
            Message::Get {
                request_id: 7,
                key: Bytes::from_static(b"alpha"),
            },
        )
        .expect("get produces a response");

        match response {
            Message::GetResponse {
                request_id,
                key,
                value,
                reads,
                writes,
            } => {
                assert_eq!(request_id, 7);
                assert_eq!(key.as_ref(), b"alpha");
                assert_eq!(value.as_ref(), b"one");
                assert_eq!(reads, 1);
                assert_eq!(writes, 1);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn get_miss_uses_not_found_sentinel() {
        let store = store();

        let response = dispatch(
            &store,
            Message::Get {
                request_id: 3,
                key: Bytes::from_static(b"missing"),
            },
        )
        .expect("get produces a response");

        match response {
            Message::GetResponse {
                request_id,
                key,
                value,
                reads,
                writes,
            } => {
                assert_eq!(request_id, 3);
                assert_eq!(key.as_ref(), b"missing");
                assert_eq!(value.as_ref(), kv_protocol::NOT_FOUND.as_bytes());
                assert_eq!(reads, 0);
                assert_eq!(writes, 0);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn set_produces_no_response() {
        let store = store();
        let response = dispatch(
            &store,
            Message::Set {
                key: Bytes::from_static(b"a"),
                value: Bytes::from_static(b"b"),
            },
        );
        assert!(response.is_none());
        assert_eq!(store.get(b"a").unwrap().value().as_ref(), b"b");
    }
}
