// dkimcheck – DKIM signature verification
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

use dkimcheck::{
    verifier::{Config, VerificationError, VerificationResult, VerificationStatus, Verifier},
    StaticLookup,
};
use hickory_resolver::TokioAsyncResolver;
use std::{env, path::PathBuf, process};
use tokio::io::AsyncReadExt;
use tracing::Level;

const USAGE: &str = "\
usage: dkimcheck [options] [FILE]

Verify the DKIM signatures of the email message in FILE, or on standard
input when no file is given. Exits 0 when at least one of the reported
signatures verified, 1 when none did.

options:
  --allow-expired   accept expired signatures (x= in the past)
  --index N         report only on the Nth signature, counting from 1
  --key-file PATH   use the DKIM key record in PATH for all signatures,
                    instead of querying DNS
  --verbose         log verification internals
  --help            show this help";

struct Args {
    file: Option<PathBuf>,
    index: Option<usize>,
    key_file: Option<PathBuf>,
    allow_expired: bool,
    verbose: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args {
        file: None,
        index: None,
        key_file: None,
        allow_expired: false,
        verbose: false,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--index" => {
                let value = args.next().ok_or("missing value for --index")?;
                let n = value
                    .parse()
                    .map_err(|_| format!("invalid value for --index: {value}"))?;
                if n == 0 {
                    return Err("signature indexes start at 1".into());
                }
                parsed.index = Some(n);
            }
            "--key-file" => {
                let value = args.next().ok_or("missing value for --key-file")?;
                parsed.key_file = Some(value.into());
            }
            "--allow-expired" => parsed.allow_expired = true,
            "--verbose" => parsed.verbose = true,
            "--help" => {
                println!("{USAGE}");
                process::exit(0);
            }
            _ if arg.starts_with('-') => {
                return Err(format!("unrecognised option: {arg}"));
            }
            _ => {
                if parsed.file.is_some() {
                    return Err("more than one input file given".into());
                }
                parsed.file = Some(arg.into());
            }
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() {
    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("dkimcheck: {e}");
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_writer(std::io::stderr)
            .init();
    } else {
        let _ = tracing_subscriber::fmt::try_init();
    }

    let msg = match &args.file {
        Some(path) => match tokio::fs::read(path).await {
            Ok(msg) => msg,
            Err(e) => {
                eprintln!("dkimcheck: cannot read {}: {e}", path.display());
                process::exit(2);
            }
        },
        None => {
            let mut msg = vec![];
            if let Err(e) = tokio::io::stdin().read_to_end(&mut msg).await {
                eprintln!("dkimcheck: cannot read standard input: {e}");
                process::exit(2);
            }
            msg
        }
    };

    let config = Config {
        allow_expired: args.allow_expired,
        ..Default::default()
    };

    let results = if let Some(path) = &args.key_file {
        let record = match tokio::fs::read_to_string(path).await {
            Ok(record) => record,
            Err(e) => {
                eprintln!("dkimcheck: cannot read {}: {e}", path.display());
                process::exit(2);
            }
        };

        let mut lookup = StaticLookup::new();
        lookup.set_fallback(record.trim());

        Verifier::verify_message(&lookup, &msg, &config).await
    } else {
        let resolver = TokioAsyncResolver::tokio(Default::default(), Default::default());

        Verifier::verify_message(&resolver, &msg, &config).await
    };

    let results = match results {
        Ok(results) => results,
        Err(e) => {
            eprintln!("dkimcheck: ill-formed message: {e}");
            process::exit(2);
        }
    };

    if results.is_empty() {
        println!("message is not signed");
        process::exit(1);
    }

    let mut any_in_scope = false;
    let mut any_valid = false;

    for result in &results {
        if let Some(n) = args.index {
            if result.index + 1 != n {
                continue;
            }
        }

        any_in_scope = true;
        any_valid |= result.status == VerificationStatus::Success;

        print_result(result);
    }

    if !any_in_scope {
        let n = args.index.unwrap_or_default();
        println!("message has no signature with index {n}");
    }

    process::exit(if any_valid { 0 } else { 1 });
}

fn print_result(result: &VerificationResult) {
    let n = result.index + 1;

    print!("signature {n}: {}", result.verdict());

    let (domain, selector) = match &result.signature {
        Some(sig) => (Some(sig.domain.to_string()), Some(sig.selector.to_string())),
        None => match &result.status {
            VerificationStatus::Failure(VerificationError::DkimSignatureFormat(e)) => {
                (e.domain.as_ref().map(|d| d.to_string()), None)
            }
            _ => (None, None),
        },
    };

    if let Some(domain) = domain {
        print!(" d={domain}");
    }
    if let Some(selector) = selector {
        print!(" s={selector}");
    }
    if result.is_testing() {
        print!(" (testing)");
    }

    if let VerificationStatus::Failure(error) = &result.status {
        print!(": {error}");
    }

    println!();
}
