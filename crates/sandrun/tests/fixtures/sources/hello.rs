fn main() {
    let name = "rust";
    println!("Hello from {name}!");
}
