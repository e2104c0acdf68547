//
// Copyright 2025 Tabs Data Inc.
//

use clap::Parser;
use mb_common::config::ServerConfig;
use mb_common::env;
use mb_common::instance::Instance;
use mb_common::logging::{LogOutput, init as init_logging};
use mb_common::status::ExitStatus;
use mb_error::MbError;
use mb_registry::registry::valid_function_name;
use mb_security::DEFAULT_ADMIN_EMAIL;
use mb_services::auth::AuthError;
use std::path::Path;
use std::process::exit;
use tracing::error;

mod boot;
mod cli;

use cli::{Cli, Command, FunctionsCommand};

fn main() {
    let cli = Cli::parse();
    let instance = Instance::new(
        cli.instance
            .clone()
            .unwrap_or_else(mb_common::env::instance_dir),
    );

    let runtime = tokio::runtime::Runtime::new().expect("cannot start the async runtime");
    let status = runtime.block_on(run(cli, instance));
    exit(status.code());
}

async fn run(cli: Cli, instance: Instance) -> ExitStatus {
    match cli.command {
        Command::Init { email, password } => init(instance, email, password).await,
        Command::Serve { reload } => serve(instance, reload).await,
        Command::Functions {
            command: FunctionsCommand::New { name, description },
        } => functions_new(instance, &name, &description),
    }
}

fn load_config(instance: &Instance) -> Result<ServerConfig, ExitStatus> {
    ServerConfig::load(instance).map_err(|err| {
        eprintln!("Configuration error: {err}");
        ExitStatus::ConfigError
    })
}

async fn init(instance: Instance, email: Option<String>, password: Option<String>) -> ExitStatus {
    init_logging(LogOutput::StdOut, true);
    if instance.initialized() {
        eprintln!(
            "Instance {:?} is already initialized",
            instance.root()
        );
        return ExitStatus::BootstrapConflict;
    }
    let Ok(config) = load_config(&instance) else {
        return ExitStatus::ConfigError;
    };

    let result: Result<(), MbError> = async {
        instance.create_dirs()?;
        let server = boot::build(&config, &instance).await?;
        let email = email.unwrap_or_else(|| DEFAULT_ADMIN_EMAIL.to_string());
        let password = password.unwrap_or_else(mb_security::generate_secret);
        server
            .api
            .auth
            .bootstrap(&server.api.users, &email, &password)
            .await?;
        println!("Initialized instance {:?}", instance.root());
        println!("Admin account: {email}");
        Ok(())
    }
    .await;

    match result {
        Ok(()) => ExitStatus::Success,
        Err(err) if err.is_domain_err::<AuthError>() => {
            eprintln!("Already initialized: {err}");
            ExitStatus::BootstrapConflict
        }
        Err(err) => {
            eprintln!("Init failed: {err}");
            ExitStatus::GeneralError
        }
    }
}

async fn serve(instance: Instance, reload: bool) -> ExitStatus {
    let Ok(config) = load_config(&instance) else {
        return ExitStatus::ConfigError;
    };
    if !instance.initialized() {
        eprintln!(
            "Instance {:?} is not initialized, run 'minibase init' first",
            instance.root()
        );
        return ExitStatus::ConfigError;
    }
    let log_output = if env::check_flag_env("MB_LOG_STDOUT") {
        LogOutput::StdOut
    } else {
        LogOutput::File(instance.log_dir().join(mb_common::logging::LOG_FILE))
    };
    init_logging(log_output, false);

    let result: Result<(), MbError> = async {
        let server = boot::build(&config, &instance).await?;
        boot::serve(server, reload).await
    }
    .await;

    match result {
        Ok(()) => ExitStatus::Success,
        Err(err) => {
            error!("Server failed: {}", err);
            eprintln!("Server failed: {err}");
            ExitStatus::GeneralError
        }
    }
}

fn functions_new(instance: Instance, name: &str, description: &str) -> ExitStatus {
    if !valid_function_name(name) {
        eprintln!("Invalid function name '{name}', must be snake_case");
        return ExitStatus::GeneralError;
    }
    let path = instance.functions_dir().join(format!("{name}.py"));
    if path.exists() {
        eprintln!("Function file {path:?} already exists");
        return ExitStatus::GeneralError;
    }
    let scaffold = scaffold(name, description);
    match instance.write_file(Path::new(&format!("functions/{name}.py")), &scaffold) {
        Ok(path) => {
            println!("Created {path:?}");
            ExitStatus::Success
        }
        Err(err) => {
            eprintln!("Cannot create function file: {err}");
            ExitStatus::GeneralError
        }
    }
}

fn scaffold(name: &str, description: &str) -> String {
    format!(
        r#"# /// script
# dependencies = []
# ///

from minibase import register


@register(description="{description}", auth="admin")
def {name}(input):
    return {{"ok": True}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold_parses_as_inline_deps() {
        let source = scaffold("hello", "Greets");
        assert!(source.contains("def hello(input):"));
        assert!(source.contains("description=\"Greets\""));
        assert_eq!(
            mb_registry::source::parse_inline_deps(&source).unwrap(),
            Vec::<String>::new()
        );
    }

    #[tokio::test]
    async fn test_functions_new_creates_scaffold() {
        let instance = Instance::new(testdir::testdir!());
        instance.create_dirs().unwrap();
        let status = functions_new(instance.clone(), "hello", "Greets");
        assert_eq!(status.code(), 0);

        // a second scaffold for the same name is refused
        let status = functions_new(instance, "hello", "Greets");
        assert_eq!(status.code(), 1);
    }

    #[test]
    fn test_invalid_function_name_is_rejected() {
        let instance = Instance::new(testdir::testdir!());
        let status = functions_new(instance, "Not-Snake", "");
        assert_eq!(status.code(), 1);
    }
}
