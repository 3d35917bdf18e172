// Fibonacci generator traced by the session and CLI tests

struct Fib {
    a: u64,
    b: u64,
    remaining: u32,
}

impl Iterator for Fib {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.a;
        self.a = self.b;
        self.b += current;
        Some(current)
    }
}

fn fib(n: u32) -> Fib {
    Fib {
        a: 0,
        b: 1,
        remaining: n,
    }
}

fn main() {
    let values: Vec<u64> = fib(20).collect();
    let total: u64 = values.iter().sum();
    println!("{}", total);
}
