/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! `e4tools` inspects and modifies ext4 filesystem images stored in regular
//! files, without mounting them.

mod cat;
mod dump;
mod fsck;
mod info;
mod ls;
mod stat;

use ext4::Image;
use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print full error traces.
    debug: bool,
    /// If true, print command line help.
    help: bool,
    /// Positional arguments: the image path, the command, then the command's
    /// operands.
    positional: Vec<String>,
}

fn parse_args() -> Args {
    let mut res: Args = Default::default();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-d" | "--debug" => res.debug = true,
            "-h" | "--help" => res.help = true,
            _ => res.positional.push(arg),
        }
    }
    res
}

/// Prints command usage.
fn print_usage() {
    eprintln!("e4tools: bad usage");
    eprintln!("Try 'e4tools --help' for more information.");
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" e4tools [-d | --debug] <image> <command> [arguments...]");
    println!();
    println!("Inspects and modifies ext4 filesystem images.");
    println!();
    println!("Commands:");
    println!(" stat <path>\t\tPrints inode information");
    println!(" cat <path>\t\tWrites a file's content to the standard output");
    println!(" ls [-r] [path]\t\tLists a directory (default: `/`)");
    println!(" path_to_inode <path>\tPrints the inode number of a file");
    println!(" dump <path> <dest>\tCopies a file's content out of the image");
    println!(" mv <src> <dst>\t\tRenames or moves a file (alias: rename)");
    println!(" rm <path>\t\tRemoves a file or directory");
    println!(" fsck\t\t\tChecks the filesystem's consistency");
    println!(" info\t\t\tPrints the filesystem's geometry");
    println!();
    println!("Options:");
    println!(" -d, --debug\tPrints full error traces.");
    println!(" -h, --help\tPrints help.");
}

/// Returns the command operand at index `i`, or exits with a usage error.
fn operand(operands: &[String], i: usize) -> PathBuf {
    match operands.get(i) {
        Some(arg) => PathBuf::from(arg),
        None => {
            print_usage();
            exit(1);
        }
    }
}

fn run(img: &mut Image, command: &str, operands: &[String]) -> ext4::Result<()> {
    match command {
        "stat" => stat::run(img, &operand(operands, 0)),
        "cat" => cat::run(img, &operand(operands, 0)),
        "ls" => {
            let recursive = operands.iter().any(|arg| arg == "-r");
            let path = operands
                .iter()
                .find(|arg| *arg != "-r")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/"));
            ls::run(img, &path, recursive)
        }
        "path_to_inode" => {
            let inode_no = ext4::dirent::resolve_path(img, &operand(operands, 0))?;
            println!("{inode_no}");
            Ok(())
        }
        "dump" => dump::run(img, &operand(operands, 0), &operand(operands, 1)),
        "mv" | "rename" => ext4::write::mv(img, &operand(operands, 0), &operand(operands, 1)),
        "rm" => ext4::write::rm(img, &operand(operands, 0)),
        "fsck" => fsck::run(img),
        "info" => info::run(img),
        _ => {
            print_usage();
            exit(1);
        }
    }
}

fn main() {
    let args = parse_args();
    if args.help {
        print_help();
        exit(0);
    }
    let mut positional = args.positional.into_iter();
    let (Some(image), Some(command)) = (positional.next(), positional.next()) else {
        print_usage();
        exit(1);
    };
    let operands: Vec<String> = positional.collect();

    let write = matches!(command.as_str(), "mv" | "rename" | "rm");
    let res = Image::open(Path::new(&image), write)
        .and_then(|mut img| run(&mut img, &command, &operands));
    if let Err(e) = res {
        if args.debug {
            eprintln!("e4tools: error: {e:?}");
        } else {
            eprintln!("e4tools: error: {e}");
        }
        exit(1);
    }
}
