//! End-to-end protocol tests: a raw-frame client against a session over an
//! in-memory duplex stream, with the scriptable mock backend behind it.

mod common;

use common::*;

use pg_bridge::backend::mock::MockBackend;
use pg_bridge::backend::{BatchOutcome, CommandKind};
use pg_bridge::codec::{oid, PgValue};
use pg_bridge::config::Config;

fn text(value: &str) -> Option<PgValue> {
    Some(PgValue::Text(value.to_string()))
}

#[tokio::test]
async fn hello_world_simple_query() {
    let backend = MockBackend::new();
    backend.push_rows(&[("?column?", oid::TEXT)], vec![vec![text("Hello World!")]]);
    let mut client = spawn_session(backend, Config::default()).await;

    client.send(query("SELECT 'Hello World!'")).await;
    let frames = client.recv_until_ready().await;

    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
    assert_eq!(data_row_text(&frames[1].1), "Hello World!");
    assert_eq!(command_tag(&frames[2].1), "SELECT 1");
    assert_eq!(ready_status(&frames), b'I');
}

#[tokio::test]
async fn extended_query_insert() {
    let backend = MockBackend::new();
    let mut client = spawn_session(backend.clone(), Config::default()).await;

    client
        .send(parse("", "INSERT INTO t VALUES ($1,$2)", &[]))
        .await;
    client
        .send(bind(
            "",
            "",
            &[0, 0],
            &[Some(b"2"), Some(b"Two")],
            &[],
        ))
        .await;
    client.send(execute("", 0)).await;
    client.send(sync()).await;

    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'1', b'2', b'C', b'Z']);
    assert_eq!(command_tag(&frames[2].1), "INSERT 0 1");
    assert_eq!(ready_status(&frames), b'I');
}

#[tokio::test]
async fn implicit_transaction_mid_string_failure() {
    let backend = MockBackend::new();
    backend.push_count(1, CommandKind::Insert);
    backend.push_error("22P02", "invalid input syntax for type bigint: \"NOT_A_NUMBER\"");
    let mut client = spawn_session(backend.clone(), Config::default()).await;

    client
        .send(query(
            "INSERT INTO t VALUES(1,'a'); INSERT INTO t VALUES(NOT_A_NUMBER,'b'); \
             INSERT INTO t VALUES(3,'c');",
        ))
        .await;
    let frames = client.recv_until_ready().await;

    assert_eq!(tags(&frames), vec![b'C', b'E', b'Z']);
    assert_eq!(command_tag(&frames[0].1), "INSERT 0 1");
    assert_eq!(error_sqlstate(&frames[1].1), "22P02");
    assert_eq!(ready_status(&frames), b'I');

    // The third statement never ran and the first was rolled back.
    assert_eq!(backend.executed().len(), 2);
    assert_eq!(backend.tx_log(), vec!["begin", "rollback"]);
}

#[tokio::test]
async fn portal_suspension_resumes_across_executes() {
    let backend = MockBackend::new();
    let rows: Vec<Vec<Option<PgValue>>> =
        (1..=5).map(|i| vec![Some(PgValue::Int4(i))]).collect();
    backend.push_rows(&[("n", oid::INT4)], rows);
    let mut client = spawn_session(backend, Config::default()).await;

    client.send(parse("", "SELECT n FROM five", &[])).await;
    client.send(bind("", "", &[], &[], &[])).await;
    client.send(execute("", 2)).await;
    client.send(execute("", 2)).await;
    client.send(execute("", 2)).await;
    client.send(sync()).await;

    let frames = client.recv_until_ready().await;
    assert_eq!(
        tags(&frames),
        vec![b'1', b'2', b'D', b'D', b's', b'D', b'D', b's', b'D', b'C', b'Z']
    );
    assert_eq!(command_tag(&frames[9].1), "SELECT 5");
    // Rows arrive in order 1..=5 across the three Executes.
    let cells: Vec<String> = frames
        .iter()
        .filter(|(tag, _)| *tag == b'D')
        .map(|(_, payload)| data_row_text(payload))
        .collect();
    assert_eq!(cells, vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn batch_distribution_preserves_statement_order() {
    let backend = MockBackend::new();
    backend.push_batch(BatchOutcome::Complete(vec![3, 0, 7]));
    let mut client = spawn_session(backend.clone(), Config::default()).await;

    for (name, sql) in [
        ("s1", "INSERT INTO t VALUES (1)"),
        ("s2", "UPDATE t SET a = 2"),
        ("s3", "DELETE FROM t"),
    ] {
        client.send(parse(name, sql, &[])).await;
        client.send(bind(name, name, &[], &[], &[])).await;
        client.send(execute(name, 0)).await;
    }
    client.send(sync()).await;

    let frames = client.recv_until_ready().await;
    assert_eq!(
        tags(&frames),
        vec![b'1', b'2', b'C', b'1', b'2', b'C', b'1', b'2', b'C', b'Z']
    );
    let command_tags: Vec<String> = frames
        .iter()
        .filter(|(tag, _)| *tag == b'C')
        .map(|(_, payload)| command_tag(payload))
        .collect();
    assert_eq!(command_tags, vec!["INSERT 0 3", "UPDATE 0", "DELETE 7"]);

    // One batch of three reached the backend.
    let batches = backend.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 3);
}

#[tokio::test]
async fn failed_transaction_gate() {
    let backend = MockBackend::new();
    backend.push_error("42P01", "relation \"missing\" does not exist");
    let mut client = spawn_session(backend.clone(), Config::default()).await;

    client.send(query("BEGIN")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(command_tag(&frames[0].1), "BEGIN");
    assert_eq!(ready_status(&frames), b'T');

    client.send(query("SELECT * FROM missing")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(error_sqlstate(&frames[0].1), "42P01");
    assert_eq!(ready_status(&frames), b'E');

    // Anything but COMMIT/ROLLBACK now fails with 25P02.
    client.send(query("SELECT 1")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(error_sqlstate(&frames[0].1), "25P02");
    assert_eq!(ready_status(&frames), b'E');

    // COMMIT of a failed transaction rolls back.
    client.send(query("COMMIT")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(command_tag(&frames[0].1), "ROLLBACK");
    assert_eq!(ready_status(&frames), b'I');
    assert!(backend.tx_log().contains(&"rollback"));
}

#[tokio::test]
async fn extended_error_suppresses_until_sync() {
    let backend = MockBackend::new();
    let mut client = spawn_session(backend, Config::default()).await;

    // Bind against a statement that was never parsed.
    client.send(bind("", "nope", &[], &[], &[])).await;
    // These must all be ignored.
    client.send(execute("", 0)).await;
    client.send(describe(b'P', "")).await;
    client.send(sync()).await;

    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'E', b'Z']);
    assert_eq!(error_sqlstate(&frames[0].1), "26000");
    assert_eq!(ready_status(&frames), b'I');

    // The group after Sync works normally again.
    client.send(parse("", "SELECT 1", &[])).await;
    client.send(sync()).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'1', b'Z']);
}

#[tokio::test]
async fn describe_statement_reports_parameters_and_fields() {
    let backend = MockBackend::new();
    backend.set_describe(
        "SELECT name FROM t WHERE id = $1",
        &[("name", oid::TEXT)],
    );
    let mut client = spawn_session(backend, Config::default()).await;

    client
        .send(parse("s1", "SELECT name FROM t WHERE id = $1", &[oid::INT8]))
        .await;
    client.send(describe(b'S', "s1")).await;
    client.send(sync()).await;

    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'1', b't', b'T', b'Z']);
    // ParameterDescription carries the int8 hint.
    let payload = &frames[1].1;
    assert_eq!(i16::from_be_bytes([payload[0], payload[1]]), 1);
    assert_eq!(
        u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]),
        oid::INT8
    );
}

#[tokio::test]
async fn describe_non_result_statement_is_no_data() {
    let backend = MockBackend::new();
    let mut client = spawn_session(backend, Config::default()).await;

    client.send(parse("d1", "INSERT INTO t VALUES (1)", &[])).await;
    client.send(describe(b'S', "d1")).await;
    client.send(sync()).await;

    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'1', b't', b'n', b'Z']);
}

#[tokio::test]
async fn empty_query_yields_empty_query_response() {
    let backend = MockBackend::new();
    let mut client = spawn_session(backend, Config::default()).await;

    client.send(query("")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'I', b'Z']);

    client.send(query("   ;  ")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'I', b'Z']);
}

#[tokio::test]
async fn set_show_reset_round_trip() {
    let backend = MockBackend::new();
    let mut client = spawn_session(backend, Config::default()).await;

    client.send(query("SET application_name = 'my app'")).await;
    let frames = client.recv_until_ready().await;
    // ParameterStatus precedes CommandComplete for tracked parameters.
    assert_eq!(tags(&frames), vec![b'S', b'C', b'Z']);
    assert_eq!(command_tag(&frames[1].1), "SET");

    client.send(query("SHOW application_name")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
    assert_eq!(data_row_text(&frames[1].1), "my app");
    assert_eq!(command_tag(&frames[2].1), "SHOW");

    client.send(query("RESET application_name")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(command_tag(&frames[frames.len() - 2].1), "RESET");

    client.send(query("SHOW application_name")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(data_row_text(&frames[1].1), "");
}

#[tokio::test]
async fn unknown_parameter_rejected_when_strict() {
    let backend = MockBackend::new();
    let config = Config {
        accept_unknown_parameters: false,
        ..Config::default()
    };
    let mut client = spawn_session(backend, config).await;

    client.send(query("SET my.knob = '1'")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(error_sqlstate(&frames[0].1), "42704");
}

#[tokio::test]
async fn version_query_is_intercepted_locally() {
    let backend = MockBackend::new();
    let mut client = spawn_session(backend.clone(), Config::default()).await;

    client.send(query("SELECT version()")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
    assert!(data_row_text(&frames[1].1).starts_with("PostgreSQL"));
    // The backend never saw the statement.
    assert!(backend.executed().is_empty());
}

#[tokio::test]
async fn prepare_execute_deallocate_sql_statements() {
    let backend = MockBackend::new();
    backend.push_rows(&[("n", oid::INT8)], vec![vec![Some(PgValue::Int8(2))]]);
    let mut client = spawn_session(backend, Config::default()).await;

    client
        .send(query("PREPARE p1 (int8) AS SELECT $1 + 0"))
        .await;
    let frames = client.recv_until_ready().await;
    assert_eq!(command_tag(&frames[0].1), "PREPARE");

    client.send(query("EXECUTE p1 (2)")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'T', b'D', b'C', b'Z']);
    assert_eq!(data_row_text(&frames[1].1), "2");

    client.send(query("DEALLOCATE p1")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(command_tag(&frames[0].1), "DEALLOCATE");

    client.send(query("EXECUTE p1 (2)")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(error_sqlstate(&frames[0].1), "26000");
}

#[tokio::test]
async fn multi_statement_parse_is_rejected() {
    let backend = MockBackend::new();
    let mut client = spawn_session(backend, Config::default()).await;

    client
        .send(parse("", "SELECT 1; SELECT 2", &[]))
        .await;
    client.send(sync()).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'E', b'Z']);
    assert_eq!(error_sqlstate(&frames[0].1), "42601");
}

#[tokio::test]
async fn flush_emits_pending_without_ready_for_query() {
    let backend = MockBackend::new();
    let mut client = spawn_session(backend, Config::default()).await;

    client.send(parse("", "SELECT 1", &[])).await;
    client.send(flush()).await;
    let frame = client.recv().await;
    assert_eq!(frame.0, b'1');

    // Nothing more until Sync provides the ReadyForQuery.
    client.send(sync()).await;
    let frame = client.recv().await;
    assert_eq!(frame.0, b'Z');
}

#[tokio::test]
async fn close_is_idempotent() {
    let backend = MockBackend::new();
    let mut client = spawn_session(backend, Config::default()).await;

    client.send(close(b'S', "ghost")).await;
    client.send(close(b'P', "ghost")).await;
    client.send(sync()).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'3', b'3', b'Z']);
}

#[tokio::test]
async fn binary_parameter_and_result_formats() {
    let backend = MockBackend::new();
    backend.push_rows(&[("n", oid::INT4)], vec![vec![Some(PgValue::Int4(258))]]);
    let mut client = spawn_session(backend, Config::default()).await;

    client
        .send(parse("", "SELECT n FROM t WHERE id = $1", &[oid::INT4]))
        .await;
    // Binary int4 parameter, binary result requested.
    client
        .send(bind("", "", &[1], &[Some(&258i32.to_be_bytes())], &[1]))
        .await;
    client.send(execute("", 0)).await;
    client.send(sync()).await;

    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'1', b'2', b'D', b'C', b'Z']);
    let payload = &frames[2].1;
    // One column, 4-byte big-endian 258.
    assert_eq!(i16::from_be_bytes([payload[0], payload[1]]), 1);
    assert_eq!(
        i32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]),
        4
    );
    assert_eq!(
        i32::from_be_bytes([payload[6], payload[7], payload[8], payload[9]]),
        258
    );
}

#[tokio::test]
async fn idle_in_transaction_timeout_fails_the_block() {
    let backend = MockBackend::new();
    let config = Config {
        idle_in_transaction_timeout_secs: 1,
        ..Config::default()
    };
    let mut client = spawn_session(backend.clone(), config).await;

    client.send(query("BEGIN")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(ready_status(&frames), b'T');

    // Sit idle past the deadline; the session fails the block on its own.
    let (tag, payload) = client.recv().await;
    assert_eq!(tag, b'E');
    assert_eq!(error_sqlstate(&payload), "25P02");
    assert!(backend.tx_log().contains(&"rollback"));

    // The gate now applies until the block is closed.
    client.send(query("SELECT 1")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(error_sqlstate(&frames[0].1), "25P02");
    assert_eq!(ready_status(&frames), b'E');

    client.send(query("ROLLBACK")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(ready_status(&frames), b'I');
}

#[tokio::test]
async fn cancel_aborts_next_execute() {
    let backend = MockBackend::new();
    let (mut client, key) = spawn_session_with_key(backend.clone(), Config::default()).await;

    client.send(parse("", "SELECT * FROM slow", &[])).await;
    client.send(bind("", "", &[], &[], &[])).await;
    // Out-of-band cancel referencing the session's secret key.
    pg_bridge::session::registry::cancel(key.process_id, key.secret_key);
    client.send(execute("", 0)).await;
    client.send(sync()).await;

    let frames = client.recv_until_ready().await;
    assert_eq!(tags(&frames), vec![b'1', b'2', b'E', b'Z']);
    assert_eq!(error_sqlstate(&frames[2].1), "57014");
    assert!(backend.tx_log().contains(&"abort"));
    // The statement itself never ran.
    assert!(backend.executed().is_empty());
}

#[tokio::test]
async fn savepoint_rollback_to_clears_failed_state() {
    let backend = MockBackend::new();
    let mut client = spawn_session(backend.clone(), Config::default()).await;

    client.send(query("BEGIN")).await;
    client.recv_until_ready().await;
    client.send(query("SAVEPOINT sp")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(command_tag(&frames[0].1), "SAVEPOINT");

    backend.push_error("23505", "duplicate key");
    client.send(query("INSERT INTO t VALUES (1)")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(ready_status(&frames), b'E');

    client.send(query("ROLLBACK TO SAVEPOINT sp")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(command_tag(&frames[0].1), "ROLLBACK");
    assert_eq!(ready_status(&frames), b'T');

    client.send(query("COMMIT")).await;
    let frames = client.recv_until_ready().await;
    assert_eq!(command_tag(&frames[0].1), "COMMIT");
    assert_eq!(ready_status(&frames), b'I');
}
