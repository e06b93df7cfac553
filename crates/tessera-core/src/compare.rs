//! The total order over documents.
//!
//! "Newest first": `timestamp` descending, ties broken by `signature`
//! ascending. Every driver's notion of "latest at a path" must agree with
//! this, including SQL `ORDER BY timestamp DESC, signature ASC`.

use std::cmp::Ordering;

use crate::document::Document;

/// Compare two documents newest-first.
///
/// `Less` means `a` sorts before `b`, i.e. `a` is the newer one.
/// `Equal` only when timestamp and signature are both identical.
pub fn cmp_newest_first(a: &Document, b: &Document) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| a.signature.cmp(&b.signature))
}

/// Sort documents newest-first in place.
pub fn sort_newest_first(docs: &mut [Document]) {
    docs.sort_by(cmp_newest_first);
}

/// The winner among a set of documents, if any.
pub fn latest<'a, I>(docs: I) -> Option<&'a Document>
where
    I: IntoIterator<Item = &'a Document>,
{
    docs.into_iter().min_by(|a, b| cmp_newest_first(a, b))
}

/// Order by path ascending, then newest-first within a path.
pub fn cmp_path_then_newest(a: &Document, b: &Document) -> Ordering {
    a.path
        .cmp(&b.path)
        .then_with(|| cmp_newest_first(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Ed25519Signature;
    use crate::crypto::Keypair;
    use crate::types::WorkspaceId;
    use proptest::prelude::*;

    fn doc(timestamp: i64, sig_byte: u8) -> Document {
        let mut d = Document::unsigned(
            "tes.1",
            WorkspaceId::parse("+club.abc").unwrap(),
            Keypair::from_seed(&[1; 32]).public_key(),
            "/x",
            "",
            timestamp,
            None,
        );
        d.signature = Ed25519Signature([sig_byte; 64]);
        d
    }

    #[test]
    fn test_newer_timestamp_wins() {
        assert_eq!(cmp_newest_first(&doc(200, 9), &doc(100, 1)), Ordering::Less);
        assert_eq!(cmp_newest_first(&doc(100, 1), &doc(200, 9)), Ordering::Greater);
    }

    #[test]
    fn test_signature_breaks_ties_ascending() {
        assert_eq!(cmp_newest_first(&doc(100, 1), &doc(100, 2)), Ordering::Less);
        assert_eq!(cmp_newest_first(&doc(100, 2), &doc(100, 1)), Ordering::Greater);
        assert_eq!(cmp_newest_first(&doc(100, 2), &doc(100, 2)), Ordering::Equal);
    }

    #[test]
    fn test_latest_picks_unique_winner() {
        let docs = vec![doc(100, 5), doc(300, 7), doc(300, 3), doc(200, 0)];
        let winner = latest(&docs).unwrap();
        assert_eq!(winner.timestamp, 300);
        assert_eq!(winner.signature, Ed25519Signature([3; 64]));
        assert!(latest(&Vec::<Document>::new()).is_none());
    }

    #[test]
    fn test_path_then_newest() {
        let mut a = doc(100, 1);
        a.path = "/b".into();
        let mut b = doc(500, 1);
        b.path = "/a".into();
        assert_eq!(cmp_path_then_newest(&b, &a), Ordering::Less);
    }

    proptest! {
        #[test]
        fn test_order_is_total_and_antisymmetric(
            t1 in 0i64..1000, s1 in any::<u8>(),
            t2 in 0i64..1000, s2 in any::<u8>(),
        ) {
            let (a, b) = (doc(t1, s1), doc(t2, s2));
            let ab = cmp_newest_first(&a, &b);
            let ba = cmp_newest_first(&b, &a);
            prop_assert_eq!(ab, ba.reverse());
            prop_assert_eq!(ab == Ordering::Equal, t1 == t2 && s1 == s2);
        }

        #[test]
        fn test_sort_puts_latest_first(
            items in prop::collection::vec((0i64..50, any::<u8>()), 1..20)
        ) {
            let mut docs: Vec<Document> = items.iter().map(|(t, s)| doc(*t, *s)).collect();
            let winner = latest(&docs).cloned().unwrap();
            sort_newest_first(&mut docs);
            prop_assert_eq!(cmp_newest_first(&docs[0], &winner), Ordering::Equal);
        }
    }
}
