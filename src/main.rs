use cvemirror::application::Application;

use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::process::exit;

fn main() {
    // Warnings and errors only, unless RUST_LOG says otherwise
    SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .env()
        .init()
        .expect("Unable to initialize the logger.");

    let mut application = Application::new();
    application.read_argv();
    if let Err(e) = application.run() {
        eprintln!("{}", e);
        exit(1);
    }
}
