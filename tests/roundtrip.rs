// Property tests: arbitrary session maps survive every in-process backend unchanged.
use proptest::prelude::*;
use time::{Date, Duration, OffsetDateTime, Time, UtcOffset};

use tower_sessions_vault::{
    Cipher, Codec, CookieStore, MemoryStore, SecretKey, SessionMap, SessionStore, Value,
};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        ".{0,24}".prop_map(Value::String),
        any::<f64>()
            .prop_filter("finite", |n| n.is_finite())
            .prop_map(Value::Float),
        offset_date_time().prop_map(Value::Time),
    ]
}

/// Any calendar day in years -9999..=9999, any instant of it, any whole-second offset.
fn offset_date_time() -> impl Strategy<Value = OffsetDateTime> {
    (
        -9999i32..=9999,
        1u16..=365,
        0u64..86_400_000_000_000,
        -93_599i32..=93_599,
    )
        .prop_map(|(year, ordinal, nanos, offset)| {
            let date = Date::from_ordinal_date(year, ordinal).expect("ordinal is in range");
            let time_of_day = Time::from_hms_nano(
                (nanos / 3_600_000_000_000) as u8,
                (nanos / 60_000_000_000 % 60) as u8,
                (nanos / 1_000_000_000 % 60) as u8,
                (nanos % 1_000_000_000) as u32,
            )
            .expect("time of day is in range");
            let offset = UtcOffset::from_whole_seconds(offset).expect("offset is in range");
            date.with_time(time_of_day).assume_offset(offset)
        })
}

fn value() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
        ]
    })
}

fn session_map() -> impl Strategy<Value = SessionMap> {
    prop::collection::btree_map("[a-z][a-z0-9]{0,11}", value(), 0..8)
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime builds")
        .block_on(future)
}

proptest! {
    #[test]
    fn codec_preserves_maps(map in session_map()) {
        let codec = Codec::new();
        let bytes = codec.encode(&map).expect("map encodes");
        let decoded = codec.decode(&bytes).expect("map decodes");
        // Times compare by instant; the debug form also pins their offsets.
        prop_assert_eq!(format!("{decoded:?}"), format!("{map:?}"));
        prop_assert_eq!(decoded, map);
    }

    #[test]
    fn cookie_store_preserves_maps(map in session_map()) {
        let store = CookieStore::new(&SecretKey::generate()).with_compress_threshold(64);
        let read = block_on(async {
            let value = store.write("", &map, Duration::hours(1)).await?;
            store.read(&value).await
        });
        prop_assert_eq!(read.expect("session reads back"), map);
    }

    #[test]
    fn memory_store_preserves_maps(map in session_map()) {
        let store = MemoryStore::new();
        let read = block_on(async {
            let key = store.write("", &map, Duration::hours(1)).await?;
            store.read(&key).await
        });
        prop_assert_eq!(read.expect("session reads back"), map);
    }

    #[test]
    fn cipher_rejects_any_single_bit_flip(
        plaintext in prop::collection::vec(any::<u8>(), 0..64),
        bit in 0usize..8,
        index in any::<prop::sample::Index>(),
    ) {
        let cipher = Cipher::new(&SecretKey::generate());
        let mut sealed = cipher.encrypt(&plaintext, b"aad").expect("plaintext seals");
        let at = index.index(sealed.len());
        sealed[at] ^= 1 << bit;
        prop_assert!(cipher.decrypt(&sealed, b"aad").is_err());
    }
}
