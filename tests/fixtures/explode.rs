// Panics three frames deep

fn explode(depth: u32) -> u32 {
    if depth == 0 {
        panic!("boom");
    }
    explode(depth - 1) + 1
}

fn main() {
    let value = explode(3);
    println!("{}", value);
}
