//! Interactive console on the server's stdin.

use std::sync::Arc;

use stallcore::pool::lock_bridge;
use stallcore::proto::packet;
use stallcore::registry::BridgeList;
use stallcore::support::lower_case;
use stallcore::{ServerCtx, Side};

/// Longest notice accepted from the console.
const MAX_NOTICE_LEN: usize = 512;

pub trait ConsoleCommand: Send {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn execute(&self, args: &[&str], ctx: &Arc<ServerCtx>);
}

pub struct Console {
    commands: Vec<Box<dyn ConsoleCommand>>,
}

impl Console {
    pub fn standard() -> Console {
        Console {
            commands: vec![
                Box::new(StopCommand),
                Box::new(StatCommand),
                Box::new(NoticeCommand),
                Box::new(DisconnectCommand),
                Box::new(KickCommand),
            ],
        }
    }

    /// Run one console line. A leading slash is optional; `help` is answered
    /// here since it needs the command list itself.
    pub fn dispatch(&self, line: &str, ctx: &Arc<ServerCtx>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let line = line.strip_prefix('/').unwrap_or(line);
        let mut parts = line.split_whitespace();
        let name = match parts.next() {
            Some(name) => lower_case(name),
            None => return,
        };
        let args: Vec<&str> = parts.collect();

        if name == "help" {
            self.print_help();
            return;
        }

        for command in &self.commands {
            if command.name() == name {
                command.execute(&args, ctx);
                return;
            }
        }

        println!("Unknown command '{}'. Type /help for the list of commands.", name);
    }

    fn print_help(&self) {
        println!("Available commands:");
        println!("1) '/help' - Show available console commands.");

        for (index, command) in self.commands.iter().enumerate() {
            println!("{}) '/{}' - {}", index + 2, command.name(), command.description());
        }
    }
}

struct StopCommand;

impl ConsoleCommand for StopCommand {
    fn name(&self) -> &'static str {
        "stop"
    }

    fn description(&self) -> &'static str {
        "Stop the server."
    }

    fn execute(&self, _args: &[&str], ctx: &Arc<ServerCtx>) {
        println!("Stopping the server...");
        ctx.request_stop();
    }
}

struct StatCommand;

impl ConsoleCommand for StatCommand {
    fn name(&self) -> &'static str {
        "stat"
    }

    fn description(&self) -> &'static str {
        "Show server statistics."
    }

    fn execute(&self, _args: &[&str], ctx: &Arc<ServerCtx>) {
        let stats = ctx.stats();

        println!("Server statistics");
        println!("* Uptime: {} seconds", stats.uptime.as_secs());
        println!("* Clients connected: {} / {}", stats.online, stats.capacity);
        println!("* Offline stalls: {}", stats.offline);
        println!("* Threads: {}", stats.worker_loads.len());

        for (index, load) in stats.worker_loads.iter().enumerate() {
            println!("    thread {}: {} relays", index + 1, load);
        }
    }
}

struct NoticeCommand;

impl ConsoleCommand for NoticeCommand {
    fn name(&self) -> &'static str {
        "notice"
    }

    fn description(&self) -> &'static str {
        "Send a message to the system chat channel of all connected clients."
    }

    fn execute(&self, args: &[&str], ctx: &Arc<ServerCtx>) {
        if args.is_empty() {
            println!("Wrong syntax: /{} [message]", self.name());
            return;
        }

        let message = args.join(" ");
        if message.len() > MAX_NOTICE_LEN {
            println!("Wrong command: Too long message");
            return;
        }

        let payload = packet::system_notice(&message);
        let mut sent = 0usize;

        for slot in ctx.active.snapshot() {
            let bridge_arc = ctx.pool.get(slot).clone();
            let mut bridge = lock_bridge(&bridge_arc);

            // Only clients with a character in the world see system chat.
            if bridge.game_connected() && bridge.session.character_id != 0 {
                let _ = bridge.send_packet(Side::Game, &payload, ctx);
                sent += 1;
            }
        }

        println!("Notice sent to ({}) clients.", sent);
    }
}

struct DisconnectCommand;

impl ConsoleCommand for DisconnectCommand {
    fn name(&self) -> &'static str {
        "disconnect"
    }

    fn description(&self) -> &'static str {
        "Disconnect clients: [all] - all clients; [offline] - offline stalls only."
    }

    fn execute(&self, args: &[&str], ctx: &Arc<ServerCtx>) {
        if args.len() != 1 {
            println!("Wrong syntax: /{} [all|offline]", self.name());
            return;
        }

        let slots: Vec<usize> = match lower_case(args[0]).as_str() {
            "offline" => ctx.offline.snapshot(),
            "all" => ctx
                .active
                .snapshot()
                .into_iter()
                .chain(ctx.offline.snapshot())
                .collect(),
            _ => {
                println!("Wrong parameter: /{} [all|offline]", self.name());
                return;
            }
        };

        let count = slots.len();
        for slot in slots {
            disconnect_slot(ctx, slot);
        }

        println!("({}) clients disconnected!", count);
    }
}

struct KickCommand;

impl ConsoleCommand for KickCommand {
    fn name(&self) -> &'static str {
        "kick"
    }

    fn description(&self) -> &'static str {
        "Disconnect a client: [character] [name] - by character name; [account] [name] - by account."
    }

    fn execute(&self, args: &[&str], ctx: &Arc<ServerCtx>) {
        if args.len() != 2 {
            println!("Wrong syntax: /{} [character|account] [name]", self.name());
            return;
        }

        let name = args[1];
        let lookup: fn(&BridgeList, &stallcore::pool::BridgePool, &str) -> Option<usize> =
            match lower_case(args[0]).as_str() {
                "character" => BridgeList::find_by_character,
                "account" => BridgeList::find_by_account,
                _ => {
                    println!("Wrong parameter: /{} [character|account] [name]", self.name());
                    return;
                }
            };

        let found =
            lookup(&ctx.active, &ctx.pool, name).or_else(|| lookup(&ctx.offline, &ctx.pool, name));

        match found {
            Some(slot) => {
                disconnect_slot(ctx, slot);
                println!("Client '{}' disconnected!", name);
            }
            None => println!("Client '{}' not found!", name),
        }
    }
}

fn disconnect_slot(ctx: &Arc<ServerCtx>, slot: usize) {
    let bridge_arc = ctx.pool.get(slot).clone();
    let mut bridge = lock_bridge(&bridge_arc);

    if bridge.is_open() {
        bridge.disconnect(ctx);
    }
    drop(bridge);

    ctx.finish_close(slot);
}
