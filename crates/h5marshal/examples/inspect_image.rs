//! Prints the node tree of a serialized container image.
//!
//! Without an argument a small demo file is built and printed instead.

use std::fs;

use h5marshal::{
    unescape, ArrayData, Attribute, File, MemoryFile, NodeId, NodeKind, Options, Storage, Value,
};

fn format_attribute(attr: &Attribute) -> String {
    match attr {
        Attribute::Str(s) => format!("{:?}", s),
        Attribute::Int(v) => format!("{}", v),
        Attribute::U64Array(v) => format!("{:?}", v),
        Attribute::StrArray(v) => format!("{:?}", v),
    }
}

fn format_data(data: &ArrayData) -> String {
    let kind = data.kind().name();
    match data.strings() {
        Some(strings) if strings.len() == 1 => {
            let preview: String = strings[0].chars().take(60).collect();
            format!("{} \"{}\"", kind, preview)
        }
        _ => format!("{}[{}]", kind, data.len()),
    }
}

fn print_node(file: &MemoryFile, node: NodeId, name: &str, depth: usize) {
    let indent = "  ".repeat(depth);
    let display = unescape(name).unwrap_or_else(|_| name.to_string());
    match file.kind(node).expect("node kind") {
        NodeKind::Group => println!("{}{}/", indent, display),
        NodeKind::Dataset => {
            let (shape, data) = file.read_dataset(node).expect("dataset");
            println!("{}{} {:?} {}", indent, display, shape, format_data(&data));
        }
    }
    for key in file.attribute_names(node).expect("attribute names") {
        if let Some(attr) = file.attribute(node, &key).expect("attribute") {
            println!("{}  @{} = {}", indent, key, format_attribute(&attr));
        }
    }
    if file.kind(node).expect("node kind") == NodeKind::Group {
        for child in file.children(node).expect("children") {
            let id = file.child(node, &child).expect("child").expect("listed child");
            print_node(file, id, &child, depth + 1);
        }
    }
}

fn demo() -> Vec<u8> {
    let mut file = File::create(Options::new());
    let value = Value::dict([
        ("name", Value::str("sensor-7")),
        ("readings", Value::list([Value::Float(0.5), Value::Float(1.25)])),
        ("enabled", Value::Bool(true)),
    ]);
    file.write("/config", &value).expect("write demo value");
    file.to_bytes()
}

fn main() {
    let data = match std::env::args().nth(1) {
        Some(path) => {
            println!("Reading: {}", path);
            fs::read(&path).expect("Failed to read file")
        }
        None => demo(),
    };
    println!("Image size: {} bytes", data.len());

    let file = MemoryFile::from_bytes(&data).expect("Failed to decode");
    println!("Compat header: {}", file.userblock().is_some());
    println!("Nodes: {}\n", file.node_count());
    print_node(&file, file.root(), "", 0);
}
