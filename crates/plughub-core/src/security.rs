//! Standard security handler (RC4)
//!
//! Locking writes revision 3 with a 128-bit key and the same user and owner
//! password. Unlocking accepts revisions 2 and 3 with either password; the
//! document engine also uses it to open files whose user password is empty.

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, StringFormat};
use rc4::consts::{U10, U11, U12, U13, U14, U15, U16, U5, U6, U7, U8, U9};
use rc4::{KeyInit, Rc4, StreamCipher};
use thiserror::Error;
use tracing::debug;

const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01,
    0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53,
    0x69, 0x7A,
];

/// Every permission granted
const ALL_PERMISSIONS: i64 = -4;

const KEY_BYTES: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("PDF is already encrypted.")]
    AlreadyEncrypted,

    #[error("PDF is not encrypted.")]
    NotEncrypted,

    #[error("Invalid password for PDF.")]
    BadPassword,

    #[error("Unsupported encryption: {0}")]
    Unsupported(String),

    #[error("Malformed encryption dictionary: {0}")]
    Malformed(&'static str),
}

/// Parameters of one Standard handler dictionary
struct Handler {
    revision: i64,
    key_len: usize,
    owner: Vec<u8>,
    user: Vec<u8>,
    permissions: i64,
    file_id: Vec<u8>,
}

impl Handler {
    fn read(doc: &Document) -> Result<(Option<ObjectId>, Self), SecurityError> {
        let entry = doc
            .trailer
            .get(b"Encrypt")
            .map_err(|_| SecurityError::NotEncrypted)?;
        let (encrypt_id, dict) = match entry {
            Object::Reference(id) => {
                let dict = doc
                    .get_dictionary(*id)
                    .map_err(|_| SecurityError::Malformed("Encrypt is not a dictionary"))?;
                (Some(*id), dict)
            }
            Object::Dictionary(dict) => (None, dict),
            _ => return Err(SecurityError::Malformed("Encrypt is not a dictionary")),
        };

        let filter = dict.get(b"Filter").and_then(Object::as_name).unwrap_or(b"");
        if filter != b"Standard" {
            return Err(SecurityError::Unsupported(format!(
                "filter {}",
                String::from_utf8_lossy(filter)
            )));
        }
        let version = integer(dict, b"V").unwrap_or(0);
        let revision = integer(dict, b"R").ok_or(SecurityError::Malformed("missing R"))?;
        if !matches!(version, 1 | 2) || !matches!(revision, 2 | 3) {
            return Err(SecurityError::Unsupported(format!("V{} R{}", version, revision)));
        }
        let bits = if revision == 2 { 40 } else { integer(dict, b"Length").unwrap_or(40) };
        if bits % 8 != 0 || !(40..=128).contains(&bits) {
            return Err(SecurityError::Unsupported(format!("{}-bit key", bits)));
        }

        let handler = Handler {
            revision,
            key_len: (bits / 8) as usize,
            owner: bytes(dict, b"O").ok_or(SecurityError::Malformed("missing O"))?,
            user: bytes(dict, b"U").ok_or(SecurityError::Malformed("missing U"))?,
            permissions: integer(dict, b"P").ok_or(SecurityError::Malformed("missing P"))?,
            file_id: file_id(doc).unwrap_or_default(),
        };
        Ok((encrypt_id, handler))
    }

    /// File key for a user password
    fn file_key(&self, password: &[u8]) -> Vec<u8> {
        let mut context = md5::Context::new();
        context.consume(pad(password));
        context.consume(&self.owner);
        context.consume((self.permissions as i32).to_le_bytes());
        context.consume(&self.file_id);
        let mut hash = context.compute().0;
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = md5::compute(&hash[..self.key_len]).0;
            }
        }
        hash[..self.key_len].to_vec()
    }

    /// `/U` value for a file key
    fn user_entry(&self, key: &[u8]) -> Result<Vec<u8>, SecurityError> {
        if self.revision == 2 {
            let mut data = PASSWORD_PADDING.to_vec();
            rc4(key, &mut data)?;
            return Ok(data);
        }
        let mut context = md5::Context::new();
        context.consume(PASSWORD_PADDING);
        context.consume(&self.file_id);
        let mut data = context.compute().0.to_vec();
        rounds(key, &mut data, 0..=19)?;
        data.resize(32, 0);
        Ok(data)
    }

    fn authenticate_user(&self, password: &[u8]) -> Result<Option<Vec<u8>>, SecurityError> {
        let key = self.file_key(password);
        let expected = self.user_entry(&key)?;
        let compared = if self.revision == 2 { 32 } else { 16 };
        let matches = self.user.len() >= compared && expected[..compared] == self.user[..compared];
        Ok(matches.then_some(key))
    }

    /// Recover the user password from `/O` with an owner password
    fn authenticate_owner(&self, password: &[u8]) -> Result<Option<Vec<u8>>, SecurityError> {
        let owner_key = owner_key(password, self.revision, self.key_len);
        let mut user_password = self.owner.clone();
        if self.revision == 2 {
            rc4(&owner_key, &mut user_password)?;
        } else {
            rounds(&owner_key, &mut user_password, (0..=19).rev())?;
        }
        self.authenticate_user(&user_password)
    }
}

/// Encrypt every string and stream of `doc` in place.
///
/// The document must already be compressed the way it will be saved.
pub fn encrypt(doc: &mut Document, password: &str) -> Result<(), SecurityError> {
    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(SecurityError::AlreadyEncrypted);
    }
    drop_container_streams(doc);

    let file_id = match file_id(doc) {
        Some(id) => id,
        None => {
            let id = uuid::Uuid::new_v4().as_bytes().to_vec();
            doc.trailer.set(
                "ID",
                vec![
                    Object::String(id.clone(), StringFormat::Hexadecimal),
                    Object::String(id.clone(), StringFormat::Hexadecimal),
                ],
            );
            id
        }
    };

    let password = password.as_bytes();
    let owner = owner_entry(password, password)?;
    let mut handler = Handler {
        revision: 3,
        key_len: KEY_BYTES,
        owner,
        user: Vec::new(),
        permissions: ALL_PERMISSIONS,
        file_id,
    };
    let key = handler.file_key(password);
    handler.user = handler.user_entry(&key)?;

    let ids: Vec<ObjectId> = doc.objects.keys().copied().collect();
    for id in ids {
        if let Some(object) = doc.objects.get_mut(&id) {
            apply_object(&key, id, object)?;
        }
    }

    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 2,
        "R" => 3,
        "Length" => (KEY_BYTES * 8) as i64,
        "O" => Object::String(handler.owner, StringFormat::Hexadecimal),
        "U" => Object::String(handler.user, StringFormat::Hexadecimal),
        "P" => ALL_PERMISSIONS,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    debug!(objects = doc.objects.len(), "Encrypted document");
    Ok(())
}

/// Decrypt `doc` in place with either its user or owner password
pub fn decrypt(doc: &mut Document, password: &str) -> Result<(), SecurityError> {
    let (encrypt_id, handler) = Handler::read(doc)?;
    let password = password.as_bytes();
    let key = match handler.authenticate_user(password)? {
        Some(key) => key,
        None => handler
            .authenticate_owner(password)?
            .ok_or(SecurityError::BadPassword)?,
    };

    drop_container_streams(doc);
    if let Some(id) = encrypt_id {
        doc.objects.remove(&id);
    }
    let ids: Vec<ObjectId> = doc.objects.keys().copied().collect();
    for id in ids {
        if let Some(object) = doc.objects.get_mut(&id) {
            apply_object(&key, id, object)?;
        }
    }
    doc.trailer.remove(b"Encrypt");
    debug!(revision = handler.revision, "Decrypted document");
    Ok(())
}

/// RC4 is symmetric, so one walk serves both directions
fn apply_object(file_key: &[u8], id: ObjectId, object: &mut Object) -> Result<(), SecurityError> {
    let key = object_key(file_key, id);
    apply(&key, object)
}

fn apply(key: &[u8], object: &mut Object) -> Result<(), SecurityError> {
    match object {
        Object::String(data, _) => rc4(key, data),
        Object::Array(items) => items.iter_mut().try_for_each(|item| apply(key, item)),
        Object::Dictionary(dict) => dict.iter_mut().try_for_each(|(_, value)| apply(key, value)),
        Object::Stream(stream) => {
            stream
                .dict
                .iter_mut()
                .try_for_each(|(_, value)| apply(key, value))?;
            rc4(key, &mut stream.content)
        }
        _ => Ok(()),
    }
}

/// Object streams and cross-reference streams are expanded on load and
/// rewritten as a plain table on save
fn drop_container_streams(doc: &mut Document) {
    doc.objects.retain(|_, object| match object {
        Object::Stream(stream) => !matches!(
            stream.dict.get(b"Type").and_then(Object::as_name),
            Ok(b"ObjStm") | Ok(b"XRef")
        ),
        _ => true,
    });
}

fn object_key(file_key: &[u8], (number, generation): ObjectId) -> Vec<u8> {
    let mut context = md5::Context::new();
    context.consume(file_key);
    context.consume(&number.to_le_bytes()[..3]);
    context.consume(&generation.to_le_bytes()[..2]);
    let hash = context.compute().0;
    hash[..(file_key.len() + 5).min(16)].to_vec()
}

/// `/O` value, revision 3
fn owner_entry(owner: &[u8], user: &[u8]) -> Result<Vec<u8>, SecurityError> {
    let key = owner_key(owner, 3, KEY_BYTES);
    let mut data = pad(user).to_vec();
    rounds(&key, &mut data, 0..=19)?;
    Ok(data)
}

fn owner_key(owner: &[u8], revision: i64, key_len: usize) -> Vec<u8> {
    let mut hash = md5::compute(pad(owner)).0;
    if revision >= 3 {
        for _ in 0..50 {
            hash = md5::compute(hash).0;
        }
    }
    hash[..key_len].to_vec()
}

/// RC4 with `key ^ i` for each `i` in `steps`
fn rounds(
    key: &[u8],
    data: &mut [u8],
    steps: impl Iterator<Item = u8>,
) -> Result<(), SecurityError> {
    for step in steps {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ step).collect();
        rc4(&round_key, data)?;
    }
    Ok(())
}

fn pad(password: &[u8]) -> [u8; 32] {
    let mut padded = PASSWORD_PADDING;
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

fn rc4(key: &[u8], data: &mut [u8]) -> Result<(), SecurityError> {
    macro_rules! keystream {
        ($($len:literal => $size:ty),* $(,)?) => {
            match key.len() {
                $($len => Rc4::<$size>::new_from_slice(key).map(|mut cipher| cipher.apply_keystream(data)),)*
                other => return Err(SecurityError::Unsupported(format!("{}-byte RC4 key", other))),
            }
        };
    }
    keystream!(
        5 => U5, 6 => U6, 7 => U7, 8 => U8, 9 => U9, 10 => U10,
        11 => U11, 12 => U12, 13 => U13, 14 => U14, 15 => U15, 16 => U16,
    )
    .map_err(|_| SecurityError::Malformed("RC4 key length"))
}

fn integer(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    dict.get(key).and_then(Object::as_i64).ok()
}

fn bytes(dict: &Dictionary, key: &[u8]) -> Option<Vec<u8>> {
    dict.get(key).and_then(Object::as_str).ok().map(<[u8]>::to_vec)
}

fn file_id(doc: &Document) -> Option<Vec<u8>> {
    let ids = doc.trailer.get(b"ID").and_then(Object::as_array).ok()?;
    ids.first()
        .and_then(|id| id.as_str().ok())
        .map(<[u8]>::to_vec)
}
