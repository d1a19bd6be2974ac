//! Fresh hostname generation: `<prefix>-<millis>-<8 random chars>.<suffix>`

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;

use super::run::{DomainMap, DomainRole};
use crate::config::defaults::DOMAIN_SUFFIX_LENGTH;
use crate::config::DomainSuffixes;

const HOST_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Largest multiple of 36 that fits in a byte
const ACCEPT_BELOW: u8 = 252;

pub fn generate_domains(suffixes: &DomainSuffixes, now: DateTime<Utc>) -> Result<DomainMap, rand::Error> {
    let stamp = now.timestamp_millis();
    let mut map = DomainMap::new();
    for role in DomainRole::ALL {
        let suffix = match role {
            DomainRole::Main => &suffixes.main,
            DomainRole::Bot => &suffixes.bot,
            DomainRole::Api => &suffixes.api,
            DomainRole::Backup => &suffixes.backup,
        };
        let host = format!("{}-{}-{}.{}", role.prefix(), stamp, random_label(DOMAIN_SUFFIX_LENGTH)?, suffix);
        map.insert(role, host);
    }
    Ok(map)
}

/// Lowercase DNS-safe random label
fn random_label(len: usize) -> Result<String, rand::Error> {
    let mut out = String::with_capacity(len);
    let mut buf = [0u8; 16];
    while out.len() < len {
        OsRng.try_fill_bytes(&mut buf)?;
        for &b in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
            if out.len() == len {
                break;
            }
            out.push(char::from(HOST_CHARS[usize::from(b) % HOST_CHARS.len()]));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_roles_generated_with_suffixes() {
        let now = Utc::now();
        let map = generate_domains(&DomainSuffixes::default(), now).unwrap();
        assert_eq!(map.roles(), DomainRole::ALL.to_vec());

        let main = map.get(DomainRole::Main).unwrap();
        assert!(main.starts_with(&format!("vote-{}-", now.timestamp_millis())));
        assert!(main.ends_with(".vercel.app"));
        assert!(map.get(DomainRole::Backup).unwrap().ends_with(".netlify.app"));
    }

    #[test]
    fn test_labels_are_dns_safe_and_distinct() {
        let a = generate_domains(&DomainSuffixes::default(), Utc::now()).unwrap();
        let b = generate_domains(&DomainSuffixes::default(), Utc::now()).unwrap();
        assert_ne!(a, b);

        let host = a.get(DomainRole::Api).unwrap();
        let label = host.split('.').next().unwrap();
        assert!(label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }
}
