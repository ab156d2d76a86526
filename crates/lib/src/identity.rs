//! Module identities.
//!
//! A module can be requested by
//! - its module name (`modcache_module_<checksum>` or any valid identifier)
//! - a signature string, whose checksum becomes the module name
//! - an object implementing [`Signed`], looked up first by its cheap
//!   [`Signed::object_key`] and then by its signature
//!
//! Resolution produces an ordered list of [`ModuleKey`]s, most specific
//! first, ending with the module name that is used on disk.

use std::convert::Infallible;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{MODULE_NAME_LENGTH_LIMIT, MODULE_NAME_PREFIX};
use crate::util::hash::{Checksum, hash_bytes};

/// An object that can describe the module it needs.
pub trait Signed {
  /// Key identifying this object in the memory cache.
  ///
  /// Must be cheap to compute. Two objects with equal keys are assumed to
  /// produce the same signature.
  fn object_key(&self) -> String;

  /// Full signature of the module this object needs.
  fn signature(&self) -> String;
}

/// What a caller asks for.
#[derive(Clone, Copy)]
pub enum ModuleId<'a> {
  /// A module name, a checksum-derived name or a signature string.
  Text(&'a str),
  /// An object providing its own signature.
  Object(&'a dyn Signed),
}

impl<'a> From<&'a str> for ModuleId<'a> {
  fn from(value: &'a str) -> Self {
    ModuleId::Text(value)
  }
}

impl std::fmt::Debug for ModuleId<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ModuleId::Text(text) => f.debug_tuple("Text").field(text).finish(),
      ModuleId::Object(obj) => f.debug_tuple("Object").field(&obj.object_key()).finish(),
    }
  }
}

/// A key in the memory cache.
///
/// Object keys and text keys live in separate namespaces so an object key
/// can never shadow a signature or module name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKey {
  Object(String),
  Text(String),
}

/// A resolved module identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
  name: String,
  keys: Vec<ModuleKey>,
}

impl Identity {
  /// Identity for a checksum, registered only under its derived module name.
  pub fn from_checksum(checksum: &Checksum) -> Self {
    let name = modulename_from_checksum(checksum);
    Self {
      keys: vec![ModuleKey::Text(name.clone())],
      name,
    }
  }

  /// Module name, also the cache entry directory name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Every alias probed for this request, most specific first.
  pub fn keys(&self) -> &[ModuleKey] {
    &self.keys
  }
}

/// Outcome of resolving a [`ModuleId`] against the memory cache.
#[derive(Debug)]
pub enum Resolved<H> {
  /// Some alias already maps to a loaded module.
  Hit(H),
  /// No alias is loaded; the identity lists everything that was probed.
  Miss(Identity),
}

#[derive(Debug, Error)]
pub enum IdentityError {
  #[error("'{0}' is not a valid module name (letters, digits and '_' only, starting with a letter or '_')")]
  InvalidName(String),

  #[error("module name '{0}' uses the reserved prefix 'modcache_module_'")]
  ReservedPrefix(String),
}

/// Construct a module name from a checksum.
pub fn modulename_from_checksum(checksum: &Checksum) -> String {
  format!("{}{}", MODULE_NAME_PREFIX, checksum.0)
}

/// Recover the checksum from a checksum-derived module name.
pub fn checksum_from_modulename(name: &str) -> Option<Checksum> {
  name
    .strip_prefix(MODULE_NAME_PREFIX)
    .map(|rest| Checksum(rest.to_string()))
}

/// Whether `name` is safe to use as a directory and module name.
pub fn is_valid_module_name(name: &str) -> bool {
  let mut chars = name.chars();
  let Some(first) = chars.next() else {
    return false;
  };

  name.len() < MODULE_NAME_LENGTH_LIMIT
    && (first.is_ascii_alphabetic() || first == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check a caller-supplied module name.
///
/// Explicit names must be valid identifiers and must stay out of the
/// namespace used for checksum-derived names.
pub fn validate_explicit_name(name: &str) -> Result<(), IdentityError> {
  if !is_valid_module_name(name) {
    return Err(IdentityError::InvalidName(name.to_string()));
  }
  if name.starts_with(MODULE_NAME_PREFIX) {
    return Err(IdentityError::ReservedPrefix(name.to_string()));
  }
  Ok(())
}

/// Resolve `id`, probing each candidate key with `lookup` as soon as it is known.
///
/// Short-circuits at the first key `lookup` recognizes, so an object's
/// signature is only computed when its object key misses.
pub fn resolve<H>(id: ModuleId<'_>, mut lookup: impl FnMut(&ModuleKey) -> Option<H>) -> Resolved<H> {
  let mut keys = Vec::with_capacity(3);

  let text = match id {
    ModuleId::Text(text) => text.to_string(),
    ModuleId::Object(obj) => {
      let key = ModuleKey::Object(obj.object_key());
      if let Some(hit) = lookup(&key) {
        return Resolved::Hit(hit);
      }
      keys.push(key);

      let signature = obj.signature();
      debug!(signature = %signature, "got signature from object");
      signature
    }
  };

  let key = ModuleKey::Text(text.clone());
  if let Some(hit) = lookup(&key) {
    return Resolved::Hit(hit);
  }
  keys.push(key);

  if is_valid_module_name(&text) {
    return Resolved::Miss(Identity { name: text, keys });
  }

  let name = modulename_from_checksum(&hash_bytes(text.as_bytes()));
  debug!(name = %name, "constructed module name from signature");
  let key = ModuleKey::Text(name.clone());
  if let Some(hit) = lookup(&key) {
    return Resolved::Hit(hit);
  }
  keys.push(key);

  Resolved::Miss(Identity { name, keys })
}

/// Resolve `id` without consulting any cache.
pub fn identity_of(id: ModuleId<'_>) -> Identity {
  match resolve::<Infallible>(id, |_| None) {
    Resolved::Miss(identity) => identity,
    Resolved::Hit(never) => match never {},
  }
}
