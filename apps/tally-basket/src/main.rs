//! # Tally Basket
//!
//! A standalone CLI shopping basket demo built on the Tally list CRDT.
//! Each replica owns a `ReplicatedList`, an observed-remove map of
//! PN-Counters, so concurrent edits to the same basket merge without
//! conflicts, in any order.

use clap::{Parser, Subcommand};
use colored::*;
use tally_core::ReplicatedList;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "tally-basket")]
#[command(about = "CRDT-based shared shopping basket (Tally)")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: two replicas edit one basket, sync, and converge
    Demo,
    /// Conflict scenario: concurrent edits across 3 replicas, merge-order independence
    Conflict,
    /// Network partition simulation: split, independent work, heal, full convergence
    Partition,
}

// ─── Replica: a device holding one basket ──────────────────────────────────

struct Replica {
    id: String,
    list: ReplicatedList,
}

impl Replica {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            list: ReplicatedList::new(id),
        }
    }

    fn add(&mut self, item: &str, amount: usize) {
        for _ in 0..amount {
            self.list.increment(item);
        }
    }

    fn take(&mut self, item: &str, amount: usize) {
        for _ in 0..amount {
            self.list.decrement(item);
        }
    }

    fn drop_item(&mut self, item: &str) {
        self.list.remove(item);
    }

    /// CRDT merge: pull another replica's state into this one.
    fn sync_from(&mut self, other: &mut Replica) {
        self.list.join(&mut other.list);
    }

    /// A detached copy, for replaying merges in different orders.
    fn fork(&self, id: &str) -> Replica {
        Replica {
            id: id.to_string(),
            list: self.list.clone(),
        }
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn sync_arrow(from: &str, to: &str) {
    println!(
        "  {} {} {} {}",
        from.bright_magenta(),
        "──sync──▶".bright_cyan(),
        to.bright_magenta(),
        "✓".bright_green()
    );
}

fn show_replica(replica: &Replica) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^42} │",
        format!("Replica: {}", replica.id).bright_yellow().to_string()
    );
    println!("  ├{}┤", border);

    if replica.list.is_empty() {
        println!("  │ {:^42} │", "(empty basket)".dimmed().to_string());
    } else {
        for (item, count) in replica.list.items() {
            let line = format!("  {:<24} x {:>5}", item, count);
            println!("  │ {:<42} │", line);
        }
    }
    println!("  └{}┘", border);
}

fn convergence_check(replicas: &[&Replica]) -> bool {
    if replicas.len() < 2 {
        return true;
    }
    let base = replicas[0];
    for r in &replicas[1..] {
        for (item, count) in base.list.items() {
            if r.list.value(item) != count {
                return false;
            }
        }
        for (item, count) in r.list.items() {
            if base.list.value(item) != count {
                return false;
            }
        }
    }
    true
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL REPLICAS CONVERGED — baskets are identical!"
                .bright_green()
                .bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED — baskets differ!".bright_red().bold()
        );
    }
}

// ─── Scenarios ────────────────────────────────────────────────────────────

fn run_demo() {
    header("TALLY BASKET — BASIC DEMO");

    let mut kitchen = Replica::new("kitchen");
    let mut phone = Replica::new("phone");

    section("Both devices edit the shared basket while offline");
    kitchen.add("milk", 2);
    kitchen.add("bread", 1);
    step("kitchen adds 2 milk, 1 bread");
    phone.add("milk", 1);
    phone.add("eggs", 6);
    phone.take("eggs", 2);
    step("phone adds 1 milk, 6 eggs, then takes 2 eggs back");

    show_replica(&kitchen);
    show_replica(&phone);

    section("Devices come online and sync");
    kitchen.sync_from(&mut phone);
    sync_arrow("phone", "kitchen");
    phone.sync_from(&mut kitchen);
    sync_arrow("kitchen", "phone");

    show_replica(&kitchen);
    show_replica(&phone);

    section("Concurrent removal: observed entries lose, unseen ones win");
    phone.drop_item("bread");
    step("phone strikes bread off the basket");
    kitchen.add("bread", 1);
    step("kitchen, unaware, adds one more bread");

    kitchen.sync_from(&mut phone);
    sync_arrow("phone", "kitchen");
    phone.sync_from(&mut kitchen);
    sync_arrow("kitchen", "phone");
    step("only the addition phone never observed survives");

    show_replica(&kitchen);
    show_replica(&phone);

    convergence_result(convergence_check(&[&kitchen, &phone]));
}

fn run_conflict() {
    header("TALLY BASKET — CONCURRENT CONFLICTS");

    let mut alice = Replica::new("alice");
    let mut bob = Replica::new("bob");
    let mut carol = Replica::new("carol");

    section("Seed a shared basket and distribute it");
    alice.add("milk", 2);
    alice.add("jam", 1);
    bob.sync_from(&mut alice);
    carol.sync_from(&mut alice);
    step("alice seeds: 2 milk, 1 jam; bob and carol sync");

    section("All three edit concurrently");
    alice.add("milk", 1);
    step("alice adds 1 more milk");
    bob.take("milk", 1);
    bob.add("eggs", 2);
    step("bob takes 1 milk and adds 2 eggs");
    carol.add("jam", 1);
    carol.add("tea", 3);
    step("carol adds 1 jam and 3 tea");

    section("Merge in two different orders");
    let mut order1 = Replica::new("merge-abc");
    order1.sync_from(&mut alice.fork("a1"));
    order1.sync_from(&mut bob.fork("b1"));
    order1.sync_from(&mut carol.fork("c1"));

    let mut order2 = Replica::new("merge-cba");
    order2.sync_from(&mut carol.fork("c2"));
    order2.sync_from(&mut bob.fork("b2"));
    order2.sync_from(&mut alice.fork("a2"));

    show_replica(&order1);
    show_replica(&order2);

    step("every edit counted exactly once, whatever the merge order");
    convergence_result(convergence_check(&[&order1, &order2]));
}

fn run_partition() {
    header("TALLY BASKET — NETWORK PARTITION");

    let mut home = Replica::new("home");
    let mut car = Replica::new("car");
    let mut office = Replica::new("office");

    section("Everyone starts from the same basket");
    home.add("milk", 1);
    home.add("bread", 2);
    car.sync_from(&mut home);
    office.sync_from(&mut home);
    step("basket replicated to all three devices");

    section("Partition: {home} | {car, office}");
    home.add("milk", 2);
    step("home (isolated) adds 2 milk");
    car.add("apples", 4);
    office.sync_from(&mut car);
    office.take("bread", 1);
    car.sync_from(&mut office);
    step("car and office keep syncing: 4 apples added, 1 bread taken");

    show_replica(&home);
    show_replica(&car);

    section("Partition heals");
    home.sync_from(&mut car);
    sync_arrow("car", "home");
    car.sync_from(&mut home);
    sync_arrow("home", "car");
    office.sync_from(&mut home);
    sync_arrow("home", "office");

    show_replica(&home);
    show_replica(&car);
    show_replica(&office);

    convergence_result(convergence_check(&[&home, &car, &office]));
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Demo => run_demo(),
        Commands::Conflict => run_conflict(),
        Commands::Partition => run_partition(),
    }
}
