use p384::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use rand::RngCore;
use tessera_crypto::{
    derive_shared_key, open_payload, parse_peer_public_key, seal_payload, CryptoError,
    InlineKeyProvider, KeyMaterialProvider, SecretKey, UnitAssembler, UNIT_PLAINTEXT_LEN,
};

/// A node as seen by its peers: a key provider plus the hex-encoded public
/// key the hub would publish for it.
struct Node {
    keys: InlineKeyProvider,
    published_key: String,
}

fn next_node() -> Node {
    let secret = SecretKey::random(&mut OsRng);
    let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();
    let public_pem = secret
        .public_key()
        .to_public_key_pem(LineEnding::LF)
        .unwrap();

    Node {
        keys: InlineKeyProvider::from_pem_bytes(pem.as_bytes()).unwrap(),
        published_key: hex::encode(public_pem),
    }
}

fn key_between(local: &Node, peer: &Node) -> tessera_crypto::SharedKey {
    let peer_public = parse_peer_public_key(&peer.published_key).unwrap();
    derive_shared_key(local.keys.local_private_key(), &peer_public).unwrap()
}

#[test]
fn sender_seals_and_receiver_opens_with_published_keys() {
    let sender = next_node();
    let receiver = next_node();
    let mut plaintext = vec![0u8; UNIT_PLAINTEXT_LEN * 2 + 10];
    OsRng.fill_bytes(&mut plaintext);

    let sealed = seal_payload(&key_between(&sender, &receiver), &plaintext).unwrap();
    let opened = open_payload(&key_between(&receiver, &sender), &sealed).unwrap();

    assert_eq!(opened, plaintext);
}

#[test]
fn third_node_cannot_open_the_payload() {
    let sender = next_node();
    let receiver = next_node();
    let eavesdropper = next_node();

    let sealed = seal_payload(&key_between(&sender, &receiver), b"between two nodes").unwrap();
    let err = open_payload(&key_between(&eavesdropper, &sender), &sealed).unwrap_err();

    assert!(matches!(err, CryptoError::AuthenticationFailure));
}

#[test]
fn receiver_assuming_the_wrong_sender_is_rejected_on_the_first_unit() {
    let sender = next_node();
    let receiver = next_node();
    let someone_else = next_node();
    let plaintext = vec![1u8; UNIT_PLAINTEXT_LEN + 1];

    let sealed = seal_payload(&key_between(&sender, &receiver), &plaintext).unwrap();

    let mut assembler = UnitAssembler::new();
    assembler.push(&sealed);
    let first = assembler.next_unit().expect("payload spans two units");
    let err = tessera_crypto::decrypt_unit(&key_between(&receiver, &someone_else), &first)
        .unwrap_err();

    assert!(err.is_authentication_failure());
}
