use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};

/// Manual client for the `/studentapi/` function view
#[derive(Debug, Parser)]
#[command(name = "studentapi-client", version)]
struct Cli {
    #[arg(long, env = "STUDENTAPI_URL", default_value = "http://127.0.0.1:8000/studentapi/")]
    url: String,

    /// Send the id in the JSON body instead of the query string
    #[arg(long)]
    id_in_body: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every student, or one with --id
    Get {
        #[arg(long)]
        id: Option<i64>,
    },
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        age: i32,
        #[arg(long)]
        email: String,
    },
    /// Change only the fields given
    Update {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        age: Option<i32>,
        #[arg(long)]
        email: Option<String>,
    },
    Delete {
        #[arg(long)]
        id: i64,
    },
}

fn request(
    client: &reqwest::Client,
    method: reqwest::Method,
    cli: &Cli,
    id: Option<i64>,
    mut body: Map<String, Value>,
) -> reqwest::RequestBuilder {
    let mut builder = client.request(method, &cli.url);
    if let Some(id) = id {
        if cli.id_in_body {
            body.insert("id".to_string(), json!(id));
        } else {
            builder = builder.query(&[("id", id)]);
        }
    }
    if body.is_empty() {
        builder
    } else {
        // Raw JSON without a content type, like a plain `data=` post
        builder.body(Value::Object(body).to_string())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let builder = match &cli.command {
        Command::Get { id } => request(&client, reqwest::Method::GET, &cli, *id, Map::new()),
        Command::Create { name, age, email } => {
            let mut body = Map::new();
            body.insert("name".to_string(), json!(name));
            body.insert("age".to_string(), json!(age));
            body.insert("email".to_string(), json!(email));
            request(&client, reqwest::Method::POST, &cli, None, body)
        }
        Command::Update { id, name, age, email } => {
            let mut body = Map::new();
            body.insert("id".to_string(), json!(id));
            if let Some(name) = name {
                body.insert("name".to_string(), json!(name));
            }
            if let Some(age) = age {
                body.insert("age".to_string(), json!(age));
            }
            if let Some(email) = email {
                body.insert("email".to_string(), json!(email));
            }
            request(&client, reqwest::Method::PUT, &cli, None, body)
        }
        Command::Delete { id } => request(&client, reqwest::Method::DELETE, &cli, Some(*id), Map::new()),
    };

    let response = builder.send().await?;
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        return Err(format!("server answered {}", status).into());
    }
    Ok(())
}
