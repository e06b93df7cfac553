//! Proptest generators for property-based testing.
//!
//! Paths and authors are drawn from small pools so generated batches
//! collide on (path, author) and share paths between authors.

use proptest::prelude::*;

use tessera_core::{
    Document, Ed25519PublicKey, Filter, HistoryMode, Keypair, OrderBy, Query, StartAfter,
    Timestamp,
};

use crate::fixtures::{TestFixture, T0};

/// Number of distinct authors the generators draw from.
pub const AUTHOR_POOL: u8 = 3;

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random Ed25519PublicKey.
pub fn public_key() -> impl Strategy<Value = Ed25519PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// The fixture for pool author `n`.
pub fn pool_author(n: u8) -> TestFixture {
    let mut seed = [0u8; 32];
    seed[0] = n;
    TestFixture::with_seed(seed)
}

/// A valid path from a small pool.
pub fn path() -> impl Strategy<Value = String> {
    "/[ab]{1,2}(/[ab]{1,2})?".prop_map(String::from)
}

pub fn content() -> impl Strategy<Value = String> {
    "[a-z ]{0,8}".prop_map(String::from)
}

/// Timestamps in the ten seconds before [`T0`], so they are valid at `T0`.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    (T0 - 10_000_000)..=T0
}

/// Parameters for generating a document.
#[derive(Debug, Clone)]
pub struct DocParams {
    pub author: u8,
    pub path: String,
    pub content: String,
    pub timestamp: Timestamp,
}

impl Arbitrary for DocParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (0..AUTHOR_POOL, path(), content(), timestamp())
            .prop_map(|(author, path, content, timestamp)| DocParams {
                author,
                path,
                content,
                timestamp,
            })
            .boxed()
    }
}

/// Generate a signed document from parameters.
pub fn doc_from_params(params: &DocParams) -> Document {
    pool_author(params.author).make_doc(&params.path, &params.content, params.timestamp)
}

fn order_by() -> impl Strategy<Value = OrderBy> {
    prop_oneof![
        Just(OrderBy::PathAsc),
        Just(OrderBy::PathDesc),
        Just(OrderBy::LocalIndexAsc),
        Just(OrderBy::LocalIndexDesc),
    ]
}

fn filter() -> impl Strategy<Value = Filter> {
    (
        proptest::option::of(path()),
        proptest::option::of("/[ab]{0,2}".prop_map(String::from)),
        proptest::option::of("[ab]{1,2}".prop_map(String::from)),
        proptest::option::of(0..AUTHOR_POOL),
        proptest::option::of(timestamp()),
        proptest::option::of(0u64..6),
    )
        .prop_map(|(path, prefix, suffix, author, ts_gt, len_lt)| Filter {
            path,
            path_starts_with: prefix,
            path_ends_with: suffix,
            author: author.map(|n| pool_author(n).public_key()),
            timestamp_gt: ts_gt,
            content_length_lt: len_lt,
            ..Filter::default()
        })
}

/// A well-formed query: the cursor, if any, agrees with the ordering.
pub fn query() -> impl Strategy<Value = Query> {
    (
        prop_oneof![Just(HistoryMode::All), Just(HistoryMode::Latest)],
        order_by(),
        proptest::option::of((path(), -1i64..20)),
        proptest::option::of(0usize..6),
        proptest::bool::weighted(0.3),
        filter(),
    )
        .prop_map(|(history_mode, order_by, cursor, limit, filtered, filter)| {
            let start_after = cursor.map(|(path, index)| match order_by {
                OrderBy::PathAsc | OrderBy::PathDesc => StartAfter::Path(path),
                OrderBy::LocalIndexAsc | OrderBy::LocalIndexDesc => StartAfter::LocalIndex(index),
            });
            Query {
                history_mode,
                order_by,
                start_after,
                limit,
                filter: if filtered { filter } else { Filter::default() },
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Ed25519Validator, FormatValidator};

    proptest! {
        #[test]
        fn test_generated_docs_are_valid(params: DocParams) {
            let doc = doc_from_params(&params);
            prop_assert_eq!(Ed25519Validator.check_valid(&doc, T0), Ok(()));
        }

        #[test]
        fn test_generated_queries_validate(query in query()) {
            prop_assert!(query.validate().is_ok());
        }
    }
}
