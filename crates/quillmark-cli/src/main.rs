use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::process;

use quillmark_core::{
    gfm_with_extensions, markdown, parse, render_sanitized, Extensions, ParseOptions,
    RenderOptions,
};

fn main() {
    let mut input: Option<String> = None;
    let mut gfm_mode = false;
    let mut extensions = Extensions::none();
    let mut options = RenderOptions::default();
    let mut sanitized = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return;
            }
            "--gfm" => gfm_mode = true,
            "--smart" => options.smart = true,
            "--table-prefer-style-attributes" => options.table_prefer_style_attributes = true,
            "--full-info-string" => options.full_info_string = true,
            // Accepted for compatibility; raw HTML passes through unless
            // safe mode is requested by an embedding caller.
            "--unsafe" => {}
            "--sanitized" => sanitized = true,
            "-e" => {
                let name = match args.next() {
                    Some(name) => name,
                    None => {
                        eprintln!("-e expects an extension name");
                        print_usage();
                        process::exit(2);
                    }
                };
                if !enable_extension(&name, &mut extensions, &mut options) {
                    eprintln!("unknown extension: {}", name);
                    print_usage();
                    process::exit(2);
                }
            }
            _ => {
                if arg.starts_with('-') {
                    eprintln!("unknown flag: {}", arg);
                    print_usage();
                    process::exit(2);
                }
                if input.is_none() {
                    input = Some(arg);
                } else {
                    eprintln!("unexpected argument: {}", arg);
                    print_usage();
                    process::exit(2);
                }
            }
        }
    }

    let source = match input {
        Some(path) => fs::read_to_string(&path).unwrap_or_else(|err| {
            eprintln!("failed to read {}: {}", path, err);
            process::exit(1);
        }),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .unwrap_or_else(|err| {
                    eprintln!("failed to read stdin: {}", err);
                    process::exit(1);
                });
            buffer
        }
    };

    if gfm_mode {
        extensions = Extensions::all();
    }

    let html = if sanitized {
        let document = parse(&source, &ParseOptions { extensions });
        let mut render_options = options.clone();
        render_options.tagfilter = render_options.tagfilter || extensions.tagfilter;
        render_sanitized(&document, &render_options)
    } else if extensions == Extensions::none() {
        markdown(&source, &options)
    } else {
        gfm_with_extensions(&source, extensions, &options)
    };

    if let Err(err) = io::stdout().write_all(html.as_bytes()) {
        eprintln!("failed to write stdout: {}", err);
        process::exit(1);
    }
}

fn enable_extension(
    name: &str,
    extensions: &mut Extensions,
    options: &mut RenderOptions,
) -> bool {
    match name {
        "table" => extensions.table = true,
        "strikethrough" => extensions.strikethrough = true,
        "tasklist" => extensions.tasklist = true,
        "autolink" => extensions.autolink = true,
        "tagfilter" => extensions.tagfilter = true,
        "footnotes" => extensions.footnotes = true,
        "smart" => options.smart = true,
        "table-prefer-style-attributes" => options.table_prefer_style_attributes = true,
        "full-info-string" => options.full_info_string = true,
        _ => return false,
    }
    true
}

fn print_usage() {
    eprintln!(
        "Usage: quillmark-cli [--gfm] [-e EXTENSION] [--smart] \
         [--table-prefer-style-attributes] [--full-info-string] [--unsafe] \
         [--sanitized] [input]"
    );
    eprintln!("Reads Markdown from [input] or stdin and writes HTML to stdout.");
    eprintln!(
        "Extensions: table, strikethrough, tasklist, autolink, tagfilter, \
         footnotes, smart, table-prefer-style-attributes, full-info-string"
    );
}
