// Counted loop, one-line helper and one-line closure, traced line by line

fn double(x: u64) -> u64 { x * 2 }

fn add(a: u64, b: u64) -> u64 {
    a + b
}

fn main() {
    let mut x = 0;
    for i in 0..3 {
        x = add(x, i);
    }
    let doubled: Vec<u64> = (0..2).map(|k| k * 2).collect();
    let total = double(x) + doubled.len() as u64;
    println!("{}", total);
}
