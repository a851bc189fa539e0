fn main() {
    if let Err(e) = lumi_chat_lib::run() {
        eprintln!("lumi-chat: {:#}", e);
        std::process::exit(1);
    }
}
