//! Prints a fresh 256-bit key as 64 hex characters, suitable for the cookie store key or a
//! backend `encryption_key`.

fn main() {
    println!("{}", tower_sessions_vault::random_key());
}
