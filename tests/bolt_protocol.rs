//! End-to-end protocol scenarios driven against an in-process mock server
//! (no live Neo4j instance required).

mod support;

use std::thread;
use std::time::Duration;

use bolt_driver::conn::{PipelinedStatement, StatementResult};
use bolt_driver::{rows_affected, ConnectInfo, Connection, Pool, PoolConfig, PoolStats, State, Value};

use support::mock_server::{self, bind_loopback};

fn connect_info(addr: std::net::SocketAddr) -> ConnectInfo {
    ConnectInfo::parse(&format!("bolt://{}:{}", addr.ip(), addr.port())).unwrap()
}

#[test]
fn handshake_negotiates_version_one() {
    let (listener, addr) = bind_loopback();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        mock_server::server_handshake(&mut stream, 1).unwrap();
        mock_server::server_init_success(&mut stream).unwrap();
    });

    let conn = Connection::connect(&connect_info(addr), "bolt-driver-test/0.1").unwrap();
    assert_eq!(conn.version(), 1);
    assert_eq!(conn.state(), State::Ready);

    server.join().unwrap();
}

#[test]
fn tiny_integer_round_trips_through_a_stream() {
    let (listener, addr) = bind_loopback();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        mock_server::server_handshake(&mut stream, 1).unwrap();
        mock_server::server_init_success(&mut stream).unwrap();

        let _run = mock_server::read_value(&mut stream).unwrap();
        let _pull = mock_server::read_value(&mut stream).unwrap();

        mock_server::write_structure(
            &mut stream,
            bolt_driver::StructSig::Success,
            vec![Value::Map(vec![(
                "fields".to_string(),
                Value::List(vec![Value::string("n")]),
            )])],
        )
        .unwrap();
        mock_server::write_structure(
            &mut stream,
            bolt_driver::StructSig::Record,
            vec![Value::List(vec![Value::Int(1)])],
        )
        .unwrap();
        mock_server::write_structure(
            &mut stream,
            bolt_driver::StructSig::Success,
            vec![Value::Map(vec![("type".to_string(), Value::string("r"))])],
        )
        .unwrap();
    });

    let mut conn = Connection::connect(&connect_info(addr), "bolt-driver-test/0.1").unwrap();
    let meta = conn.run("RETURN 1 AS n;", vec![], true).unwrap();
    assert_eq!(meta[0].1, Value::List(vec![Value::string("n")]));

    let row = conn.next_record().unwrap().unwrap();
    assert_eq!(row, vec![Value::Int(1)]);
    assert!(conn.next_record().unwrap().is_none());
    assert_eq!(conn.state(), State::Ready);

    server.join().unwrap();
}

#[test]
fn syntax_error_causes_the_pipelined_pull_to_be_ignored() {
    let (listener, addr) = bind_loopback();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        mock_server::server_handshake(&mut stream, 1).unwrap();
        mock_server::server_init_success(&mut stream).unwrap();

        // RUN with a bad statement, paired PULL_ALL from the same pipeline.
        let _run = mock_server::read_value(&mut stream).unwrap();
        let _pull = mock_server::read_value(&mut stream).unwrap();
        mock_server::write_structure(
            &mut stream,
            bolt_driver::StructSig::Failure,
            vec![Value::Map(vec![
                (
                    "code".to_string(),
                    Value::string("Neo.ClientError.Statement.SyntaxError"),
                ),
                ("message".to_string(), Value::string("bad syntax")),
            ])],
        )
        .unwrap();
        mock_server::write_structure(&mut stream, bolt_driver::StructSig::Ignored, vec![]).unwrap();
    });

    let mut conn = Connection::connect(&connect_info(addr), "bolt-driver-test/0.1").unwrap();
    let results = conn
        .pipeline(&[PipelinedStatement::pull("RETURN bogus(((", vec![])])
        .unwrap();

    assert_eq!(results.len(), 1);
    match &results[0] {
        StatementResult::Failed { code, .. } => {
            assert_eq!(code, "Neo.ClientError.Statement.SyntaxError")
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(conn.state(), State::Failed);

    server.join().unwrap();
}

#[test]
fn create_and_count_sums_the_terminal_stats() {
    let (listener, addr) = bind_loopback();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        mock_server::server_handshake(&mut stream, 1).unwrap();
        mock_server::server_init_success(&mut stream).unwrap();

        let _run = mock_server::read_value(&mut stream).unwrap();
        let _discard = mock_server::read_value(&mut stream).unwrap();
        mock_server::write_structure(&mut stream, bolt_driver::StructSig::Success, vec![Value::Map(vec![])])
            .unwrap();
        mock_server::write_structure(
            &mut stream,
            bolt_driver::StructSig::Success,
            vec![Value::Map(vec![(
                "stats".to_string(),
                Value::Map(vec![
                    ("nodes-created".to_string(), Value::Int(2)),
                    ("relationships-created".to_string(), Value::Int(1)),
                ]),
            )])],
        )
        .unwrap();
    });

    let mut conn = Connection::connect(&connect_info(addr), "bolt-driver-test/0.1").unwrap();
    conn.run("CREATE (a)-[:KNOWS]->(b);", vec![], false).unwrap();
    let stats = conn
        .last_meta()
        .unwrap()
        .iter()
        .find(|(k, _)| k == "stats")
        .and_then(|(_, v)| match v {
            Value::Map(m) => Some(m.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(rows_affected(&stats), 3);

    server.join().unwrap();
}

#[test]
fn reset_interrupts_an_open_stream() {
    let (listener, addr) = bind_loopback();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        mock_server::server_handshake(&mut stream, 1).unwrap();
        mock_server::server_init_success(&mut stream).unwrap();

        let _run = mock_server::read_value(&mut stream).unwrap();
        let _pull = mock_server::read_value(&mut stream).unwrap();
        mock_server::write_structure(&mut stream, bolt_driver::StructSig::Success, vec![Value::Map(vec![])])
            .unwrap();
        mock_server::write_structure(
            &mut stream,
            bolt_driver::StructSig::Record,
            vec![Value::List(vec![Value::Int(1)])],
        )
        .unwrap();

        let _reset = mock_server::read_value(&mut stream).unwrap();
        // a stray record from the interrupted stream, already in flight
        // when the reset was issued, arrives ahead of its terminal Success
        mock_server::write_structure(
            &mut stream,
            bolt_driver::StructSig::Record,
            vec![Value::List(vec![Value::Int(2)])],
        )
        .unwrap();
        mock_server::write_structure(&mut stream, bolt_driver::StructSig::Success, vec![Value::Map(vec![])])
            .unwrap();
    });

    let mut conn = Connection::connect(&connect_info(addr), "bolt-driver-test/0.1").unwrap();
    conn.run("MATCH (n) RETURN n;", vec![], true).unwrap();
    let _first = conn.next_record().unwrap().unwrap();
    assert_eq!(conn.state(), State::Streaming);

    conn.reset().unwrap();
    assert_eq!(conn.state(), State::Ready);

    server.join().unwrap();
}

#[test]
fn saturated_pool_blocks_the_second_acquire_until_the_first_is_released() {
    let (listener, addr) = bind_loopback();
    let server = thread::spawn(move || {
        // Only one physical dial ever happens: the second `acquire` is
        // served from the idle slot the first connection returns to.
        let (mut stream, _) = listener.accept().unwrap();
        mock_server::server_handshake(&mut stream, 1).unwrap();
        mock_server::server_init_success(&mut stream).unwrap();
        // keep the socket open for the lifetime of the test
        std::mem::forget(stream);
    });

    let pool = Pool::new(PoolConfig {
        max_conns: 1,
        acquire_timeout: Some(Duration::from_millis(500)),
        idle_timeout: None,
        connect: connect_info(addr),
        client_name: "bolt-driver-test/0.1".to_string(),
    });

    let first = pool.acquire().unwrap();
    assert_eq!(pool.stats().in_use, 1);

    let pool_ref = &pool;
    let waiter = thread::scope(|scope| {
        let handle = scope.spawn(|| pool_ref.acquire().is_ok());
        thread::sleep(Duration::from_millis(50));
        drop(first);
        handle.join().unwrap()
    });
    assert!(waiter, "second acquire should succeed once the first is released");

    server.join().unwrap();
}

#[test]
fn dirty_connection_is_reset_before_being_recycled_by_the_pool() {
    let (listener, addr) = bind_loopback();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        mock_server::server_handshake(&mut stream, 1).unwrap();
        mock_server::server_init_success(&mut stream).unwrap();

        // Run's initial Success leaves the stream open (Streaming); the
        // guard is dropped without draining it, so the pool must Reset
        // before handing the connection out again.
        let _run = mock_server::read_value(&mut stream).unwrap();
        let _pull = mock_server::read_value(&mut stream).unwrap();
        mock_server::write_structure(
            &mut stream,
            bolt_driver::StructSig::Success,
            vec![Value::Map(vec![(
                "fields".to_string(),
                Value::List(vec![Value::string("n")]),
            )])],
        )
        .unwrap();

        let _reset = mock_server::read_value(&mut stream).unwrap();
        mock_server::write_structure(&mut stream, bolt_driver::StructSig::Success, vec![Value::Map(vec![])])
            .unwrap();

        // only one physical dial happens; the second acquire is served
        // from the now-clean idle slot
        std::mem::forget(stream);
    });

    let pool = Pool::new(PoolConfig {
        max_conns: 1,
        acquire_timeout: Some(Duration::from_millis(500)),
        idle_timeout: None,
        connect: connect_info(addr),
        client_name: "bolt-driver-test/0.1".to_string(),
    });

    {
        let mut conn = pool.acquire().unwrap();
        conn.run("MATCH (n) RETURN n;", vec![], true).unwrap();
        assert_eq!(conn.state(), State::Streaming);
        // dropped here while still Streaming, without draining
    }

    assert_eq!(pool.stats(), PoolStats { max_conns: 1, in_use: 0, idle: 1 });
    let recycled = pool.acquire().unwrap();
    assert_eq!(recycled.state(), State::Ready);

    drop(recycled);
    server.join().unwrap();
}
