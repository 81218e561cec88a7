//! XMF CLI - Tool for inspecting XMF and Mobile XMF files.

use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use xmf::prelude::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_DATE: &str = env!("XMF_BUILD_DATE");
const BUILD_TIME: &str = env!("XMF_BUILD_TIME");

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut sequential = false;
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            "--sequential" => sequential = true,
            _ => filtered_args.push(arg),
        }
    }

    init_logging(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    let options = DecodeOptions::default().with_parallel(!sequential);

    match filtered_args[0] {
        "info" | "i" => {
            if filtered_args.len() < 2 {
                eprintln!("Error: missing file argument");
                eprintln!("Usage: xmf info <file.xmf> [--json]");
                std::process::exit(1);
            }
            let json_mode = filtered_args.iter().any(|&s| s == "--json" || s == "-j");
            cmd_info(filtered_args[1], options, json_mode);
        }

        "tree" | "t" => {
            if filtered_args.len() < 2 {
                eprintln!("Error: missing file argument");
                eprintln!("Usage: xmf tree <file.xmf>");
                std::process::exit(1);
            }
            cmd_tree(filtered_args[1], options);
        }

        "extract" | "x" => {
            if filtered_args.len() < 4 {
                eprintln!("Error: missing arguments");
                eprintln!("Usage: xmf extract <file.xmf> <node-path> <output>");
                std::process::exit(1);
            }
            cmd_extract(filtered_args[1], filtered_args[2], filtered_args[3], options);
        }

        "help" | "h" | "-h" | "--help" => print_help(),

        "version" | "-V" | "--version" => println!("xmf {} (built {} {})", VERSION, BUILD_DATE, BUILD_TIME),

        // Default: if file exists, show info; otherwise error
        _ => {
            if Path::new(filtered_args[0]).exists() {
                cmd_info(filtered_args[0], options, false);
            } else {
                eprintln!("Unknown command: {}", filtered_args[0]);
                eprintln!();
                print_help();
                std::process::exit(1);
            }
        }
    }
}

/// `RUST_LOG` wins over the verbosity flags.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_help() {
    println!("xmf {} - XMF / Mobile XMF file toolkit", VERSION);
    println!();
    println!("USAGE:");
    println!("    xmf [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    i, info    <file> [--json]           Show header and tree summary");
    println!("    t, tree    <file>                    Show full node hierarchy");
    println!("    x, extract <file> <path> <output>    Write a resource's content to a file");
    println!("    h, help                              Show this help");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Only show errors");
    println!("    --sequential     Decode pointer children on one thread");
    println!();
    println!("EXAMPLES:");
    println!("    xmf info ringtone.mxmf                # Quick overview");
    println!("    xmf info ringtone.mxmf --json         # Overview as JSON");
    println!("    xmf tree ringtone.mxmf                # See hierarchy");
    println!("    xmf extract ringtone.mxmf 0 song.mid  # Save the first child of the root");
    println!();
    println!("NOTES:");
    println!("    - Node paths are child indices from the root, separated by '/' (e.g. 1/0)");
    println!("    - An empty path or '/' names the root");
    println!("    - Passing a file directly is equivalent to 'info'");
}

fn open(path: &str, options: DecodeOptions) -> XmfReader {
    info!("Opening file: {}", path);
    match XmfReader::open_with(path, options) {
        Ok(reader) => reader,
        Err(e) => {
            eprintln!("Failed to open {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

fn decode(reader: &XmfReader, path: &str) -> Arc<TreeNode> {
    match reader.decode_tree() {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("Failed to decode tree of {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

fn cmd_info(path: &str, options: DecodeOptions, json_mode: bool) {
    let reader = open(path, options);
    let tree = decode(&reader, path);
    let header = reader.header();
    let errors = tree.errors();

    let mut folders = 0usize;
    let mut resources = 0usize;
    let mut formats: Vec<String> = Vec::new();
    for node in tree.iter() {
        if node.is_folder() {
            folders += 1;
        } else {
            resources += 1;
        }
        if let Some(format) = node.resource_format() {
            formats.push(format_name(format));
        }
    }
    debug!("Visited {} nodes", tree.count());

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "file": path,
                "version": version_name(header.version),
                "file_type": header.file_type_id(),
                "revision": header.revision_id(),
                "mobile_xmf": header.is_mobile_xmf(),
                "file_size": header.file_size,
                "tree": { "start": header.tree_start, "end": header.tree_end },
                "metadata_types": header.metadata_types.len(),
                "nodes": tree.count(),
                "folders": folders,
                "resources": resources,
                "depth": tree.depth(),
                "formats": formats,
                "errors": errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            }))
            .unwrap_or_default()
        );
        return;
    }

    println!("File:      {}", path);
    println!("Version:   {}", version_name(header.version));
    if let Some((file_type, revision)) = header.file_type {
        let kind = if header.is_mobile_xmf() { " (Mobile XMF)" } else { "" };
        println!("Type:      {} rev {}{}", file_type, revision, kind);
    }
    println!("Size:      {} bytes", header.file_size);
    println!("Tree:      [{}, {})", header.tree_start, header.tree_end);
    println!("Metadata types: {}", header.metadata_types.len());
    println!();
    println!("Nodes:     {} ({} folders, {} resources)", tree.count(), folders, resources);
    println!("Depth:     {}", tree.depth());
    if !formats.is_empty() {
        println!("Formats:   {}", formats.join(", "));
    }
    if !errors.is_empty() {
        println!();
        println!("Errors:");
        for e in &errors {
            println!("  {}", e);
        }
    }
}

fn cmd_tree(path: &str, options: DecodeOptions) {
    let reader = open(path, options);
    let tree = decode(&reader, path);
    print_tree(&tree, "", "", None, &mut HashSet::new());
}

/// Shared subtrees are expanded at their first occurrence only.
fn print_tree(tree: &TreeNode, prefix: &str, child_prefix: &str, index: Option<usize>, seen: &mut HashSet<u64>) {
    let node = &tree.node;
    let label = match index {
        Some(i) => format!("[{}] ", i),
        None => String::new(),
    };
    if !seen.insert(node.offset) {
        println!("{}{}{} (shared, shown above)", prefix, label, describe(node));
        return;
    }
    println!("{}{}{}", prefix, label, describe(node));

    let count = tree.children.len();
    for (i, child) in tree.children.iter().enumerate() {
        let last = i + 1 == count;
        let (branch, next) = if last { ("└── ", "    ") } else { ("├── ", "│   ") };
        let head = format!("{}{}", child_prefix, branch);
        let tail = format!("{}{}", child_prefix, next);
        match child {
            Ok(sub) => print_tree(sub, &head, &tail, Some(i), seen),
            Err(e) => println!("{}[{}] <error: {}>", head, i, e),
        }
    }
}

fn describe(node: &Node) -> String {
    let mut out = node.name().unwrap_or_else(|| "<unnamed>".to_string());
    out.push_str(&format!(" @{} ", node.offset));

    match &node.contents {
        NodeContents::Folder(contents) => {
            out.push_str(&format!("folder, {} items", node.item_count()));
            match contents {
                FolderContents::Inline(_) => {}
                FolderContents::InFileResources(_) => out.push_str(", by pointer"),
                FolderContents::InFileNode(target) => out.push_str(&format!(", -> @{}", target.0)),
            }
        }
        NodeContents::Resource(contents) => match contents {
            ResourceContents::Inline(data) => match data.content() {
                Ok(bytes) => out.push_str(&format!("{} bytes", bytes.len())),
                Err(failure) => out.push_str(&format!("{} bytes, {}", data.raw.len(), failure)),
            },
            ResourceContents::InFileResource(ptr) => out.push_str(&format!("data @{}", ptr.0)),
            ResourceContents::InFileNode(target) => out.push_str(&format!("-> @{}", target.0)),
            ResourceContents::ExternalResourceFile(location) => out.push_str(&format!("external {}", location)),
            ResourceContents::XmfUri(uri) => out.push_str(&format!("xmf {}", uri)),
            ResourceContents::XmfUriAndNodeId { uri, node_id } => {
                out.push_str(&format!("{} #{}", uri.as_deref().unwrap_or("<this file>"), node_id))
            }
        },
    }

    if let Some(format) = node.resource_format() {
        out.push_str(&format!(" [{}]", format_name(format)));
    }
    if let Some(id) = node.node_id() {
        out.push_str(&format!(" id={}", id));
    }
    out
}

fn cmd_extract(path: &str, node_path: &str, output: &str, options: DecodeOptions) {
    let indices = match parse_node_path(node_path) {
        Some(indices) => indices,
        None => {
            eprintln!("Invalid node path: {}", node_path);
            std::process::exit(1);
        }
    };

    let reader = open(path, options);
    let node = match locate(&reader, &indices) {
        Ok(node) => node,
        Err(e) => {
            eprintln!("Failed to locate node {}: {}", node_path, e);
            std::process::exit(1);
        }
    };

    let data = match reader.read_resource(&node) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Failed to read node {}: {}", node_path, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = std::fs::write(output, &data) {
        eprintln!("Failed to write {}: {}", output, e);
        std::process::exit(1);
    }
    println!("Wrote {} bytes to {}", data.len(), output);
}

fn parse_node_path(path: &str) -> Option<Vec<usize>> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect()
}

/// Walk child indices from the root without decoding unrelated subtrees.
fn locate(reader: &XmfReader, indices: &[usize]) -> xmf::Result<Arc<Node>> {
    let mut node = reader.root()?;
    for &i in indices {
        let mut children = reader.children(&node)?;
        if i >= children.len() {
            return Err(Error::InvalidStructure(format!(
                "node at offset {} has {} children, no index {}",
                node.offset,
                children.len(),
                i
            )));
        }
        node = children.swap_remove(i)?;
    }
    Ok(node)
}

fn version_name(version: XmfVersion) -> &'static str {
    match version {
        XmfVersion::V1 => "1.00",
        XmfVersion::V2 => "2.00",
    }
}

fn format_name(format: ResourceFormat) -> String {
    match format {
        ResourceFormat::Standard(StandardResourceFormat::Smf0) => "SMF type 0".to_string(),
        ResourceFormat::Standard(StandardResourceFormat::Smf1) => "SMF type 1".to_string(),
        ResourceFormat::Standard(StandardResourceFormat::Dls1) => "DLS Level 1".to_string(),
        ResourceFormat::Standard(StandardResourceFormat::Dls2) => "DLS Level 2".to_string(),
        ResourceFormat::Standard(StandardResourceFormat::Dls21) => "DLS Level 2.1".to_string(),
        ResourceFormat::Standard(StandardResourceFormat::MobileDls) => "Mobile DLS".to_string(),
        ResourceFormat::Custom { type_id, format_id } => format!("custom {}:{}", type_id, format_id),
    }
}
