use anyhow::{Context, Result};
use gateway::{WorkerClient, WorkerConfig};
use tutor_core::llm::{InvokeOpts, InvokeResult, PromptClient};
use tutor_core::schema::Schema;

const USAGE: &str = "usage: tutor-ask [--text] [--schema FILE] [--no-advertise] PROMPT...";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let (opts, prompt) = parse_args(std::env::args().skip(1))?;
    let cfg = WorkerConfig::from_env_and_file()?;
    let client = WorkerClient::new(cfg)?;

    match client.invoke(&prompt, &opts).await? {
        InvokeResult::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        InvokeResult::Text(text) => println!("{text}"),
    }
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<(InvokeOpts, String)> {
    let mut opts = InvokeOpts::json();
    let mut schema: Option<Schema> = None;
    let mut advertise = true;
    let mut words = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--text" => opts = InvokeOpts::text(),
            "--no-advertise" => advertise = false,
            "--schema" => {
                let path = args.next().context("--schema requires a file path")?;
                let data = std::fs::read_to_string(&path)
                    .with_context(|| format!("read schema file: {path}"))?;
                schema = Some(
                    serde_json::from_str(&data)
                        .with_context(|| format!("parse schema file: {path}"))?,
                );
            }
            _ => words.push(arg),
        }
    }

    if words.is_empty() {
        anyhow::bail!("{USAGE}");
    }
    if let Some(s) = schema {
        opts = if advertise {
            opts.with_schema(s)
        } else {
            opts.with_validation_schema(s)
        };
    }
    Ok((opts, words.join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::llm::ResponseFormat;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn bare_words_become_the_prompt() {
        let (opts, prompt) = parse_args(args(&["list", "2", "colors"])).unwrap();
        assert_eq!(prompt, "list 2 colors");
        assert_eq!(opts.format, ResponseFormat::Json);
        assert!(opts.schema.is_none());
    }

    #[test]
    fn text_flag_switches_format() {
        let (opts, _) = parse_args(args(&["--text", "hi"])).unwrap();
        assert_eq!(opts.format, ResponseFormat::Text);
    }

    #[test]
    fn empty_prompt_is_rejected() {
        assert!(parse_args(args(&["--text"])).is_err());
    }
}
