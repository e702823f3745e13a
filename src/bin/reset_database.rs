use pazik::{establish_connection, reset_schema, Config};

fn main() {
    let config = Config::load().expect("Environment misconfigured!");
    if !config.allow_init_db {
        eprintln!("Refusing to reset {}: set ALLOW_INIT_DB=true first.", config.database_url);
        std::process::exit(1);
    }

    let mut conn = establish_connection(&config.database_url).expect("Failed to open database");
    reset_schema(&mut conn).expect("Failed to reset database");
    println!("Database has been reset. Accounts were kept.");
}
