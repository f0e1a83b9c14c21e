//! Boundary cases of the codec and the persisted session.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use wa_protocol::core::{decode, decode_with, encode_with, Node, NodeContent, TokenDictionary};
use wa_protocol::error::ProtocolError;
use wa_protocol::protocol::{SessionCrypto, SessionRecord};

#[test]
fn test_empty_input() {
    assert!(matches!(decode(&[]), Err(ProtocolError::EndOfStream)));
}

#[test]
fn test_minimal_node() {
    // LIST_8 size 1, token "action"
    let node = decode(&[248, 1, 9]).unwrap();
    assert_eq!(node.description(), "action");
    assert!(node.attributes().is_none());
    assert!(node.content().is_none());
}

#[test]
fn test_legacy_server_in_content_and_jid() {
    // ["message", {"to": "123@s.whatsapp.net"}, "s.whatsapp.net"]
    let node = decode(&[248, 4, 52, 89, 250, 255, 0x82, 0x12, 0x3F, 80, 80]).unwrap();
    assert_eq!(node.attribute("to"), Some("123@c.us"));
    assert_eq!(node.content(), Some(&NodeContent::Text("c.us".into())));
}

#[test]
fn test_list_16_children() {
    let children: Vec<Node> = (0..300).map(|_| Node::new("item").unwrap()).collect();
    let node = Node::new("query").unwrap().with_children(children);
    let bytes = encode_with(&node, &TokenDictionary::new()).unwrap();
    assert_eq!(&bytes[3..6], &[249, 0x01, 0x2C]);
    assert_eq!(decode(&bytes).unwrap().children().len(), 300);
}

#[test]
fn test_binary_20_content() {
    let payload = Bytes::from(vec![0xAB; 70_000]);
    let node = Node::new("media")
        .unwrap()
        .with_content(NodeContent::Bytes(payload.clone()));
    let bytes = encode_with(&node, &TokenDictionary::new()).unwrap();
    assert_eq!(bytes[3], 253);
    assert_eq!(decode(&bytes).unwrap().content(), Some(&NodeContent::Bytes(payload)));
}

#[test]
fn test_extension_dictionary_round_trip() {
    let mut flat = vec![String::new(); 256];
    flat.push("reaction".to_string());
    let dictionary = TokenDictionary::from_flat(flat);

    let node = Node::new("reaction").unwrap();
    let bytes = encode_with(&node, &dictionary).unwrap();
    assert_eq!(&bytes[..], &[248, 1, 237, 0]);

    assert_eq!(decode_with(&bytes, &dictionary).unwrap(), node);
    assert!(matches!(
        decode(&bytes),
        Err(ProtocolError::UnknownToken {
            dictionary: Some(1),
            index: 0
        })
    ));
}

#[test]
fn test_session_record_file_round_trip() {
    let mut crypto = SessionCrypto::generate().unwrap();
    crypto.set_server_token("1@abc").unwrap();
    let record = crypto.serialize();

    let path = std::env::temp_dir().join(format!("wa-protocol-session-{}.json", std::process::id()));
    record.save_to_file(&path).unwrap();
    let loaded = SessionRecord::load_from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded, record);
    let restored = SessionCrypto::restore(&loaded).unwrap();
    assert_eq!(restored.public_key(), crypto.public_key());
    assert!(!restored.usable());
}

#[test]
fn test_record_with_bad_seed_rejected() {
    let record = SessionRecord::from_json(r#"{"CLIENT_ID":"AQEBAQEBAQEBAQEBAQEBAQ==","EC_KEYS_SEED":"AAAA"}"#)
        .unwrap();
    assert!(matches!(
        SessionCrypto::restore(&record),
        Err(ProtocolError::CryptoConfig(_))
    ));
}
