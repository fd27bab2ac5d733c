use anyhow::{Context, Result};
use clap::Parser;

use bolt_driver::{rows_affected, ConnectInfo, Connection, Value};

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    #[clap(long, default_value = "bolt://localhost:7687", help = "bolt:// or bolt+s:// connection URL")]
    url: String,

    #[clap(long, default_value = "bolt-cli/0.1", help = "clientName sent on INIT")]
    client_name: String,

    #[clap(long, help = "discard the result instead of streaming rows back")]
    discard: bool,

    #[clap(help = "statement to run")]
    statement: String,
}

fn print_row(fields: &[String], row: &[Value]) {
    let rendered: Vec<String> = row.iter().map(render_value).collect();
    if fields.len() == rendered.len() {
        let pairs: Vec<String> = fields
            .iter()
            .zip(rendered.iter())
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        println!("{}", pairs.join(", "));
    } else {
        println!("{}", rendered.join(", "));
    }
}

fn render_value(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.clone(),
        Value::List(items) => format!("[{}]", items.iter().map(render_value).collect::<Vec<_>>().join(", ")),
        Value::Map(_) | Value::Structure(_) => format!("{v:?}"),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let info = ConnectInfo::parse(&args.url).context("parsing connection URL")?;
    let mut conn = Connection::connect(&info, &args.client_name).context("connecting to server")?;

    let pull = !args.discard;
    let run_meta = conn
        .run(&args.statement, vec![], pull)
        .context("running statement")?;

    let mut count = 0usize;
    if pull {
        let fields: Vec<String> = run_meta
            .iter()
            .find(|(k, _)| k == "fields")
            .and_then(|(_, v)| v.as_list())
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        while let Some(row) = conn.next_record().context("reading result stream")? {
            print_row(&fields, &row);
            count += 1;
        }
    }

    if let Some(stats) = conn.last_meta().and_then(|meta| meta.iter().find(|(k, _)| k == "stats")) {
        if let Value::Map(stats) = &stats.1 {
            println!("rows affected: {}", rows_affected(stats));
        }
    }
    if pull {
        println!("{count} row(s) returned");
    }

    conn.close();
    Ok(())
}
