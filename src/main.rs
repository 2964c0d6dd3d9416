use std::env;
use std::fs;
use std::io::stdin;
use std::io::Read;
use std::process::exit;

use kaleid::astbuilder::Parser;
use kaleid::dlogger;
use kaleid::source::SourceFile;
use kaleid::tokenize::Grammar;
use kaleid::{CompileFailure, Driver};

fn main() {
  let mut dump_ast = false;
  let mut path = None;
  for arg in env::args().skip(1) {
    match arg.as_str() {
      "--dump-ast" => dump_ast = true,
      _ => path = Some(arg),
    }
  }

  let (source, name) = match &path {
    Some(path) => match fs::read_to_string(path) {
      Ok(text) => (text, Some(path.clone())),
      Err(err) => {
        eprintln!("{}: {}", path, err);
        exit(1);
      }
    },
    None => {
      let mut text = String::new();
      if let Err(err) = stdin().read_to_string(&mut text) {
        eprintln!("<stdin>: {}", err);
        exit(1);
      }
      (text, None)
    }
  };

  if dump_ast {
    let file = SourceFile::new(source.as_str(), name);
    let items: Result<Vec<_>, _> = Parser::new(Grammar::default().tokenize(&file)).collect();
    match items {
      Ok(items) => println!(
        "{}",
        serde_json::to_string_pretty(&items).unwrap_or_default()
      ),
      Err(err) => {
        eprintln!("{}", err);
        exit(1);
      }
    }
    return;
  }

  let mut driver = Driver::new();
  match driver.compile(&source, name.as_deref()) {
    Ok(module) => print!("{}", module),
    Err(CompileFailure::Config(err)) => {
      eprintln!("{}", err);
      exit(1);
    }
    Err(CompileFailure::Failed {
      diagnostics,
      errors,
    }) => {
      let file = SourceFile::new(source.as_str(), name);
      for diag in &diagnostics {
        eprintln!("{}", dlogger::render(diag, &file));
      }
      eprintln!("{}", dlogger::error_count_line(errors));
      exit(1);
    }
  }
}
