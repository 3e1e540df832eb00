//! Configuration loading and validation

use tributary::config::{Config, ConfigError, IngesterConfig};
use tributary::storage::Encoding;

#[test]
fn test_validate() {
    struct Case {
        encoding: &'static str,
        shards: usize,
        expected: Result<Encoding, &'static str>,
    }

    let cases = [
        Case {
            encoding: "lz4",
            shards: 16,
            expected: Ok(Encoding::Lz4),
        },
        Case {
            encoding: "zstd",
            shards: 16,
            expected: Ok(Encoding::Zstd),
        },
        Case {
            encoding: "none",
            shards: 1,
            expected: Ok(Encoding::None),
        },
        Case {
            encoding: "bad-enc",
            shards: 16,
            expected: Err("encoding"),
        },
        Case {
            encoding: "lz4",
            shards: 0,
            expected: Err("shards"),
        },
    ];

    for (i, case) in cases.into_iter().enumerate() {
        let mut config = IngesterConfig {
            chunk_encoding: case.encoding.to_string(),
            index_shards: case.shards,
            ..IngesterConfig::default()
        };
        let res = config.validate();
        match case.expected {
            Ok(encoding) => {
                assert!(res.is_ok(), "case {}: {:?}", i, res);
                assert_eq!(config.parsed_encoding, Some(encoding), "case {}", i);
            }
            Err("encoding") => {
                assert!(matches!(res, Err(ConfigError::InvalidEncoding(ref e)) if e == "bad-enc"));
                assert_eq!(config.parsed_encoding, None);
            }
            Err(_) => assert!(matches!(res, Err(ConfigError::InvalidShardCount)), "case {}", i),
        }
    }
}

#[test]
fn test_load_from_file_with_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tributary.toml");
    std::fs::write(
        &path,
        r#"
        [ingester]
        chunk_encoding = "zstd"
        index_shards = 4
        max_chunk_idle_ms = 60000

        [tenants.noisy]
        max_local_streams_per_user = 10
        "#,
    )
    .unwrap();

    std::env::set_var("TRIBUTARY_INDEX_SHARDS", "8");
    let mut config = Config::load_with_env(&path).unwrap();
    std::env::remove_var("TRIBUTARY_INDEX_SHARDS");
    config.validate().unwrap();

    assert_eq!(config.ingester.encoding(), Encoding::Zstd);
    assert_eq!(config.ingester.index_shards, 8);
    assert_eq!(config.ingester.max_chunk_idle().as_secs(), 60);
    // Unset fields keep their defaults
    assert_eq!(config.ingester.query_batch_size, IngesterConfig::default().query_batch_size);
    assert_eq!(config.tenants["noisy"].max_local_streams_per_user, 10);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}
