//! COPY engine tests: statement parsing, commit policy, mutation limits.

use super::*;
use crate::backend::mock::MockBackend;
use crate::codec::oid;

fn two_column_meta() -> TableMetadata {
    TableMetadata {
        table: "t".to_string(),
        columns: vec![
            ColumnInfo {
                name: "id".to_string(),
                type_oid: oid::INT8,
            },
            ColumnInfo {
                name: "name".to_string(),
                type_oid: oid::TEXT,
            },
        ],
        indexed_columns: 0,
    }
}

fn engine(meta: &TableMetadata, limit: u64, atomic: bool) -> CopyInEngine {
    let spec = parse_copy("COPY t FROM STDIN").unwrap();
    CopyInEngine::new(spec, meta, CodecContext::default(), limit, atomic).unwrap()
}

#[test]
fn parses_plain_copy_from_stdin() {
    let spec = parse_copy("COPY t FROM STDIN").unwrap();
    assert_eq!(spec.table, "t");
    assert!(spec.columns.is_empty());
    assert_eq!(spec.direction, CopyDirection::FromStdin);
    assert_eq!(spec.options.format, CopyFormat::Text);
    assert_eq!(spec.options.delimiter, b'\t');
    assert_eq!(spec.options.null_marker, "\\N");
}

#[test]
fn parses_column_list_and_qualified_name() {
    let spec = parse_copy("COPY public.users (id, \"Name\") FROM STDIN").unwrap();
    assert_eq!(spec.table, "users");
    assert_eq!(spec.columns, vec!["id".to_string(), "Name".to_string()]);
}

#[test]
fn parses_new_style_options() {
    let spec =
        parse_copy("COPY t FROM STDIN WITH (FORMAT csv, DELIMITER ';', NULL 'NIL', HEADER)")
            .unwrap();
    assert_eq!(spec.options.format, CopyFormat::Csv);
    assert_eq!(spec.options.delimiter, b';');
    assert_eq!(spec.options.null_marker, "NIL");
    assert!(spec.options.header);
}

#[test]
fn parses_legacy_options() {
    let spec = parse_copy("COPY t TO STDOUT WITH CSV HEADER").unwrap();
    assert_eq!(spec.direction, CopyDirection::ToStdout);
    assert_eq!(spec.options.format, CopyFormat::Csv);
    assert!(spec.options.header);

    let spec = parse_copy("COPY t FROM STDIN BINARY").unwrap();
    assert_eq!(spec.options.format, CopyFormat::Binary);
}

#[test]
fn rejects_copy_to_file() {
    let err = parse_copy("COPY t TO '/tmp/out'").unwrap_err();
    assert_eq!(err.sqlstate, "0A000");
}

#[test]
fn rejects_binary_with_delimiter() {
    let err = parse_copy("COPY t FROM STDIN WITH (FORMAT binary, DELIMITER '|')").unwrap_err();
    assert_eq!(err.sqlstate, "42601");
}

#[test]
fn rejects_unknown_schema() {
    let err = parse_copy("COPY other.t FROM STDIN").unwrap_err();
    assert_eq!(err.sqlstate, "22023");
}

#[tokio::test]
async fn copy_in_text_small() {
    let meta = two_column_meta();
    let mut backend = MockBackend::new();
    let mut engine = engine(&meta, 20_000, true);

    engine.feed(b"1\tOne\n2\tTwo\n");
    assert!(!engine.draining());
    let rows = engine.finish(&mut backend).await.unwrap();
    assert_eq!(rows, 2);
    let copied = backend.copied_rows();
    assert_eq!(copied.len(), 2);
    assert_eq!(
        copied[0][0],
        Some(PgValue::Int8(1))
    );
    assert_eq!(
        copied[1][1],
        Some(PgValue::Text("Two".to_string()))
    );
}

#[tokio::test]
async fn atomic_mode_exceeding_mutation_limit_fails_before_writing() {
    // 10 columns + 1 indexed column: 11 mutations per row. 1819 rows puts
    // the total at 20009, just over the 20000 ceiling.
    let columns: Vec<(String, u32)> = (0..10).map(|i| (format!("c{i}"), oid::INT8)).collect();
    let column_refs: Vec<(&str, u32)> = columns.iter().map(|(n, o)| (n.as_str(), *o)).collect();
    let mut backend = MockBackend::new();
    backend.set_table("wide", &column_refs, 1);
    let meta = backend.table_metadata("wide").await.unwrap();

    let spec = parse_copy("COPY wide FROM STDIN").unwrap();
    let mut engine =
        CopyInEngine::new(spec, &meta, CodecContext::default(), 20_000, true).unwrap();

    let row = (0..10).map(|i| i.to_string()).collect::<Vec<_>>().join("\t") + "\n";
    for _ in 0..1819 {
        engine.feed(row.as_bytes());
        if engine.draining() {
            break;
        }
    }
    assert!(engine.draining());
    let error = engine.finish(&mut backend).await.unwrap_err();
    assert_eq!(error.sqlstate, "54000");
    assert!(error.hint.unwrap().contains("partitioned_non_atomic"));
    // Nothing reached the backend.
    assert!(backend.copied_rows().is_empty());
}

#[tokio::test]
async fn partitioned_mode_commits_in_chunks() {
    let meta = two_column_meta();
    let mut backend = MockBackend::new();
    // 2 columns, no indexes: 2 mutations/row; ceiling 8 -> 4 rows per chunk.
    let mut engine = engine(&meta, 8, false);

    for i in 0..10 {
        engine.feed(format!("{i}\trow{i}\n").as_bytes());
        engine.commit_ready_chunks(&mut backend).await.unwrap();
    }
    let rows = engine.finish(&mut backend).await.unwrap();
    assert_eq!(rows, 10);
    assert_eq!(backend.copy_chunks(), vec![4, 4, 2]);
}

#[tokio::test]
async fn partitioned_failure_reports_committed_prefix() {
    let meta = two_column_meta();
    let mut backend = MockBackend::new();
    let mut engine = engine(&meta, 4, false); // 2 rows per chunk

    engine.feed(b"1\ta\n2\tb\n");
    engine.commit_ready_chunks(&mut backend).await.unwrap();
    assert_eq!(backend.copy_chunks(), vec![2]);

    backend.set_fail_next_copy(crate::backend::BackendError::new("08006", "backend gone"));
    engine.feed(b"3\tc\n4\td\n");
    let err = engine
        .commit_ready_chunks(&mut backend)
        .await
        .unwrap_err();
    assert_eq!(err.sqlstate, "08006");
    assert!(err.detail.unwrap().contains("2 rows"));
}

#[tokio::test]
async fn parse_error_enters_drain_substate() {
    let meta = two_column_meta();
    let mut backend = MockBackend::new();
    let mut engine = engine(&meta, 20_000, true);

    engine.feed(b"1\tOne\nnot_a_number\tTwo\n");
    assert!(engine.draining());
    // Subsequent data is discarded silently.
    engine.feed(b"3\tThree\n");
    assert_eq!(engine.rows_received(), 1);
    let error = engine.finish(&mut backend).await.unwrap_err();
    assert_eq!(error.sqlstate, "22P02");
    assert!(backend.copied_rows().is_empty());
}

#[tokio::test]
async fn row_width_mismatch_is_bad_copy_format() {
    let meta = two_column_meta();
    let mut backend = MockBackend::new();
    let mut engine = engine(&meta, 20_000, true);
    engine.feed(b"lonely\n");
    assert!(engine.draining());
    let error = engine.finish(&mut backend).await.unwrap_err();
    assert_eq!(error.sqlstate, "22P04");
}

#[test]
fn copy_out_text_encoding() {
    let result = ResultSet {
        columns: vec![
            ColumnInfo {
                name: "id".to_string(),
                type_oid: oid::INT8,
            },
            ColumnInfo {
                name: "name".to_string(),
                type_oid: oid::TEXT,
            },
        ],
        rows: vec![
            vec![Some(PgValue::Int8(1)), Some(PgValue::Text("One".to_string()))],
            vec![Some(PgValue::Int8(2)), None],
        ],
    };
    let options = CopyOptions::defaults_for(CopyFormat::Text);
    let frames = encode_copy_out(&result, &options, &CodecContext::default()).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(&frames[0][5..], b"1\tOne\n");
    assert_eq!(&frames[1][5..], b"2\t\\N\n");
}

#[test]
fn copy_out_binary_has_header_and_trailer() {
    let result = ResultSet {
        columns: vec![ColumnInfo {
            name: "id".to_string(),
            type_oid: oid::INT4,
        }],
        rows: vec![vec![Some(PgValue::Int4(7))]],
    };
    let options = CopyOptions::defaults_for(CopyFormat::Binary);
    let frames = encode_copy_out(&result, &options, &CodecContext::default()).unwrap();
    assert_eq!(frames.len(), 3);
    assert!(frames[0][5..].starts_with(b"PGCOPY"));
    assert_eq!(&frames[2][5..], &(-1i16).to_be_bytes());
}

#[test]
fn copy_out_query_shapes() {
    let spec = parse_copy("COPY t TO STDOUT").unwrap();
    assert_eq!(copy_out_query(&spec), "SELECT * FROM t");
    let spec = parse_copy("COPY t (a, b) TO STDOUT").unwrap();
    assert_eq!(copy_out_query(&spec), "SELECT a, b FROM t");
}
