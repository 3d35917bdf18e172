// Allocates and touches 64 MiB in steps so resident memory grows

fn grow(chunks: usize) -> Vec<Vec<u8>> {
    let mut held = Vec::new();
    for i in 0..chunks {
        let chunk = vec![i as u8 + 1; 8 * 1024 * 1024];
        held.push(chunk);
    }
    held
}

fn main() {
    let held = grow(8);
    let total: usize = held.iter().map(|c| c.len()).sum();
    println!("{}", total);
}
