//! Wallet signature verification over structured (EIP-712) typed data.
//!
//! A wallet signs `keccak256(0x19 0x01 ‖ domainSeparator ‖ hashStruct(message))`.
//! [`verify`] rebuilds that digest from the typed-data triple and recovers the
//! signing address. Whether the recovered address is allowed to do anything
//! is decided by the caller (see [`crate::auth`]).
//!
//! Supported field types: `address`, `bool`, `string`, `bytes`, `bytes1..32`,
//! `uint8..256`, `int8..256` and nested struct types. Arrays are rejected.

use std::collections::{BTreeMap, BTreeSet};

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

const DOMAIN_TYPE: &str = "EIP712Domain";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("malformed signature: {0}")]
    Malformed(String),

    #[error("schema mismatch: {0}")]
    Schema(String),

    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("could not recover signer")]
    Recovery,
}

pub type Result<T> = std::result::Result<T, SignatureError>;

/// One `type name` member of a struct type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl TypedField {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
        }
    }
}

/// Struct type definitions keyed by type name.
pub type TypeSchema = BTreeMap<String, Vec<TypedField>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDataDomain {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifying_contract: Option<String>,
}

impl TypedDataDomain {
    /// The `EIP712Domain` members actually present, in canonical order.
    fn fields(&self) -> Vec<TypedField> {
        let mut fields = Vec::with_capacity(4);
        if self.name.is_some() {
            fields.push(TypedField::new("name", "string"));
        }
        if self.version.is_some() {
            fields.push(TypedField::new("version", "string"));
        }
        if self.chain_id.is_some() {
            fields.push(TypedField::new("chainId", "uint256"));
        }
        if self.verifying_contract.is_some() {
            fields.push(TypedField::new("verifyingContract", "address"));
        }
        fields
    }

    /// `hashStruct(EIP712Domain, domain)`.
    pub fn separator(&self) -> Result<[u8; 32]> {
        let mut types = TypeSchema::new();
        types.insert(DOMAIN_TYPE.to_string(), self.fields());
        let value = serde_json::to_value(self)
            .map_err(|e| SignatureError::Schema(format!("domain: {e}")))?;
        hash_struct(DOMAIN_TYPE, &types, &value)
    }
}

/// A complete typed-data payload: domain, type schema, primary type and message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    pub domain: TypedDataDomain,
    pub types: TypeSchema,
    pub primary_type: String,
    pub message: Value,
}

impl TypedData {
    /// The 32-byte digest a wallet signs for this payload.
    pub fn digest(&self) -> Result<[u8; 32]> {
        let domain_separator = self.domain.separator()?;
        let message_hash = hash_struct(&self.primary_type, &self.types, &self.message)?;

        let mut preimage = Vec::with_capacity(66);
        preimage.extend_from_slice(&[0x19, 0x01]);
        preimage.extend_from_slice(&domain_separator);
        preimage.extend_from_slice(&message_hash);
        Ok(keccak256(&preimage))
    }
}

/// Recover the address that signed `data`.
///
/// `signature` is the 65-byte `r ‖ s ‖ v` hex string produced by wallets
/// (`v` may be `0/1` or `27/28`). Returns the lowercase `0x`-prefixed
/// address. A valid signature by *some other* wallet is not an error here.
pub fn verify(data: &TypedData, signature: &str) -> Result<String> {
    let digest = data.digest()?;
    recover_address(&digest, signature)
}

pub fn recover_address(digest: &[u8; 32], signature: &str) -> Result<String> {
    let bytes = hex::decode(strip_0x(signature))
        .map_err(|e| SignatureError::Malformed(format!("not hex: {e}")))?;
    if bytes.len() != 65 {
        return Err(SignatureError::Malformed(format!(
            "expected 65 bytes, got {}",
            bytes.len()
        )));
    }

    let v = match bytes[64] {
        v @ (0 | 1) => v,
        v @ (27 | 28) => v - 27,
        other => {
            return Err(SignatureError::Malformed(format!(
                "invalid recovery byte {other}"
            )))
        }
    };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| SignatureError::Malformed("invalid recovery id".to_string()))?;
    let signature = Signature::from_slice(&bytes[..64])
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;

    let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|_| SignatureError::Recovery)?;
    Ok(address_of(&key))
}

/// Lowercase `0x` address derived from a public key.
pub fn address_of(key: &VerifyingKey) -> String {
    let point = key.as_affine().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Validate a wallet address and return it in canonical lowercase form.
pub fn normalize_address(raw: &str) -> Result<String> {
    let bytes = parse_address(raw, "address")?;
    Ok(format!("0x{}", hex::encode(bytes)))
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut out);
    out
}

// ─────────────────────────────────────────────────────────
// Struct encoding
// ─────────────────────────────────────────────────────────

/// `encodeType`: the primary type followed by referenced struct types in
/// alphabetical order.
pub fn encode_type(primary: &str, types: &TypeSchema) -> Result<String> {
    if !types.contains_key(primary) {
        return Err(SignatureError::Schema(format!("unknown type `{primary}`")));
    }
    let mut deps = BTreeSet::new();
    collect_dependencies(primary, types, &mut deps);
    deps.remove(primary);

    let mut out = format_type(primary, &types[primary]);
    for dep in deps {
        out.push_str(&format_type(dep, &types[dep]));
    }
    Ok(out)
}

fn format_type(name: &str, fields: &[TypedField]) -> String {
    let members: Vec<String> = fields
        .iter()
        .map(|f| format!("{} {}", f.kind, f.name))
        .collect();
    format!("{name}({})", members.join(","))
}

fn collect_dependencies<'a>(name: &'a str, types: &'a TypeSchema, found: &mut BTreeSet<&'a str>) {
    if !found.insert(name) {
        return;
    }
    if let Some(fields) = types.get(name) {
        for field in fields {
            if let Some((key, _)) = types.get_key_value(field.kind.as_str()) {
                collect_dependencies(key, types, found);
            }
        }
    }
}

pub fn hash_struct(primary: &str, types: &TypeSchema, value: &Value) -> Result<[u8; 32]> {
    let fields = types
        .get(primary)
        .ok_or_else(|| SignatureError::Schema(format!("unknown type `{primary}`")))?;
    let object = value
        .as_object()
        .ok_or_else(|| SignatureError::Schema(format!("`{primary}` value is not an object")))?;

    let mut encoded = Vec::with_capacity(32 * (fields.len() + 1));
    encoded.extend_from_slice(&keccak256(encode_type(primary, types)?.as_bytes()));
    for field in fields {
        let member = object.get(&field.name).ok_or_else(|| {
            SignatureError::Schema(format!("`{primary}` is missing field `{}`", field.name))
        })?;
        encoded.extend_from_slice(&encode_field(field, member, types)?);
    }
    Ok(keccak256(&encoded))
}

fn encode_field(field: &TypedField, value: &Value, types: &TypeSchema) -> Result<[u8; 32]> {
    let kind = field.kind.as_str();
    if types.contains_key(kind) {
        return hash_struct(kind, types, value);
    }
    if kind.ends_with(']') {
        return Err(SignatureError::UnsupportedType(kind.to_string()));
    }

    let invalid = |reason: &str| SignatureError::InvalidValue {
        field: field.name.clone(),
        reason: reason.to_string(),
    };

    match kind {
        "string" => {
            let s = value.as_str().ok_or_else(|| invalid("expected string"))?;
            Ok(keccak256(s.as_bytes()))
        }
        "bytes" => {
            let s = value.as_str().ok_or_else(|| invalid("expected hex string"))?;
            let bytes = hex::decode(strip_0x(s)).map_err(|_| invalid("expected hex string"))?;
            Ok(keccak256(&bytes))
        }
        "bool" => {
            let b = value.as_bool().ok_or_else(|| invalid("expected bool"))?;
            let mut word = [0u8; 32];
            word[31] = u8::from(b);
            Ok(word)
        }
        "address" => {
            let s = value.as_str().ok_or_else(|| invalid("expected address"))?;
            let addr = parse_address(s, &field.name)?;
            let mut word = [0u8; 32];
            word[12..].copy_from_slice(&addr);
            Ok(word)
        }
        _ if kind.starts_with("uint") => {
            let bits = type_width(kind, "uint")?;
            let word = parse_uint(value).ok_or_else(|| invalid("expected unsigned integer"))?;
            let used = (bits / 8) as usize;
            if word[..32 - used].iter().any(|b| *b != 0) {
                return Err(invalid("value overflows declared width"));
            }
            Ok(word)
        }
        _ if kind.starts_with("int") => {
            type_width(kind, "int")?;
            parse_int(value).ok_or_else(|| invalid("expected signed integer"))
        }
        _ if kind.starts_with("bytes") => {
            let len: usize = kind["bytes".len()..]
                .parse()
                .map_err(|_| SignatureError::UnsupportedType(kind.to_string()))?;
            if !(1..=32).contains(&len) {
                return Err(SignatureError::UnsupportedType(kind.to_string()));
            }
            let s = value.as_str().ok_or_else(|| invalid("expected hex string"))?;
            let bytes = hex::decode(strip_0x(s)).map_err(|_| invalid("expected hex string"))?;
            if bytes.len() != len {
                return Err(invalid("wrong byte length"));
            }
            let mut word = [0u8; 32];
            word[..len].copy_from_slice(&bytes);
            Ok(word)
        }
        other => Err(SignatureError::UnsupportedType(other.to_string())),
    }
}

fn type_width(kind: &str, prefix: &str) -> Result<u32> {
    let suffix = &kind[prefix.len()..];
    if suffix.is_empty() {
        return Ok(256);
    }
    match suffix.parse::<u32>() {
        Ok(bits) if bits % 8 == 0 && (8..=256).contains(&bits) => Ok(bits),
        _ => Err(SignatureError::UnsupportedType(kind.to_string())),
    }
}

fn parse_uint(value: &Value) -> Option<[u8; 32]> {
    let mut word = [0u8; 32];
    match value {
        Value::Number(n) => {
            word[24..].copy_from_slice(&n.as_u64()?.to_be_bytes());
        }
        Value::String(s) if s.starts_with("0x") || s.starts_with("0X") => {
            let bytes = hex::decode(pad_odd_hex(&s[2..])).ok()?;
            if bytes.len() > 32 {
                return None;
            }
            word[32 - bytes.len()..].copy_from_slice(&bytes);
        }
        Value::String(s) => {
            word[16..].copy_from_slice(&s.parse::<u128>().ok()?.to_be_bytes());
        }
        _ => return None,
    }
    Some(word)
}

fn parse_int(value: &Value) -> Option<[u8; 32]> {
    let n: i128 = match value {
        Value::Number(n) => n.as_i64()?.into(),
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    let mut word = if n < 0 { [0xffu8; 32] } else { [0u8; 32] };
    word[16..].copy_from_slice(&n.to_be_bytes());
    Some(word)
}

fn parse_address(raw: &str, field: &str) -> Result<[u8; 20]> {
    let invalid = || SignatureError::InvalidValue {
        field: field.to_string(),
        reason: format!("`{raw}` is not a 20-byte hex address"),
    };
    let bytes = hex::decode(strip_0x(raw)).map_err(|_| invalid())?;
    bytes.try_into().map_err(|_| invalid())
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

fn pad_odd_hex(s: &str) -> String {
    if s.len() % 2 == 1 {
        format!("0{s}")
    } else {
        s.to_string()
    }
}

/// Build a flat message object from `(name, value)` pairs.
pub fn message(pairs: &[(&str, Value)]) -> Value {
    let mut map = Map::new();
    for (name, value) in pairs {
        map.insert((*name).to_string(), value.clone());
    }
    Value::Object(map)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
