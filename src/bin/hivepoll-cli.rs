use bytes::BytesMut;
use std::io::{self, BufRead, Write};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use hivepoll::resp::{Frame, FrameParser};

#[tokio::main]
async fn main() -> io::Result<()> {
    let mut host = "127.0.0.1".to_string();
    let mut port = 7474u16;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-h" => {
                if let Some(value) = args.get(i + 1) {
                    host = value.clone();
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if let Some(value) = args.get(i + 1) {
                    if let Ok(p) = value.parse() {
                        port = p;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    let addr = format!("{host}:{port}");
    let mut stream = TcpStream::connect(&addr).await?;
    eprintln!("Connected to {addr}");

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        print!("hivepoll> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // Inline form; the server does the word splitting and quote handling.
        stream.write_all(format!("{line}\r\n").as_bytes()).await?;

        let response = loop {
            match FrameParser::parse(&mut buf) {
                Ok(Some(frame)) => break frame,
                Ok(None) => {}
                Err(e) => {
                    eprintln!("Protocol error: {e}");
                    return Ok(());
                }
            }
            if stream.read_buf(&mut buf).await? == 0 {
                eprintln!("Connection closed by server");
                return Ok(());
            }
        };
        print_frame(&response, "");

        if line.eq_ignore_ascii_case("QUIT") {
            break;
        }
    }

    Ok(())
}

fn print_frame(frame: &Frame, indent: &str) {
    match frame {
        Frame::Simple(s) => println!("{s}"),
        Frame::Error(s) => println!("(error) {s}"),
        Frame::Integer(n) => println!("(integer) {n}"),
        Frame::Bulk(None) | Frame::Array(None) => println!("(nil)"),
        Frame::Bulk(Some(data)) => println!("\"{}\"", String::from_utf8_lossy(data)),
        Frame::Array(Some(items)) if items.is_empty() => println!("(empty array)"),
        Frame::Array(Some(items)) => {
            let nested = format!("{indent}   ");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    print!("{indent}");
                }
                print!("{}) ", i + 1);
                print_frame(item, &nested);
            }
        }
    }
}
