//! azure-drive: file operations against Azure Blob Storage from the command line.

use clap::Parser;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use azure_drive::auth::SasPermissions;
use azure_drive::config::{Command, ContainerAction};
use azure_drive::{
    Args, ContainerOptions, CopyOptions, Drive, DriveConfig, DriverRegistry, ListOptions,
    PutOptions, SasOptions,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Parse command-line arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug {
        Level::DEBUG
    } else if args.silent {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let mut config = match args.config {
        Some(ref path) => DriveConfig::from_json_file(path)?,
        None => DriveConfig::default(),
    };
    config.merge_args(&args);

    // Container commands name their container explicitly
    if let Command::Container { ref action } = args.command {
        if config.container.is_none() {
            let (ContainerAction::Create { name }
            | ContainerAction::Delete { name }
            | ContainerAction::Exists { name }) = action;
            config.container = Some(name.clone());
        }
    }

    let drive = DriverRegistry::with_defaults().create(&config)?;
    run(drive.as_ref(), args.command).await
}

async fn run(drive: &dyn Drive, command: Command) -> Result<(), BoxError> {
    match command {
        Command::Ls { prefix, recursive } => {
            let options = ListOptions {
                recursive,
                page_size: None,
            };
            for item in drive.list(prefix.as_deref().unwrap_or(""), &options).await? {
                println!("{:>12}  {}", item.content_length, item.name);
            }
        }
        Command::Get { location, output } => match output {
            Some(path) => {
                let mut stream = drive.get_stream(&location).await?;
                let mut file = tokio::fs::File::create(&path).await?;
                let mut written = 0usize;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    written += chunk.len();
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                info!("Wrote {} bytes to {}", written, path.display());
            }
            None => {
                let data = drive.get(&location).await?;
                let mut stdout = tokio::io::stdout();
                stdout.write_all(&data).await?;
                stdout.flush().await?;
            }
        },
        Command::Put {
            location,
            file,
            content_type,
            metadata,
        } => {
            let mut options = PutOptions {
                content_type,
                ..Default::default()
            };
            for entry in metadata {
                let (key, value) = entry
                    .split_once('=')
                    .ok_or_else(|| format!("metadata must be key=value, got {:?}", entry))?;
                options.metadata.insert(key.to_string(), value.to_string());
            }

            let source = tokio::fs::File::open(&file).await?;
            drive
                .put_stream(&location, ReaderStream::new(source).boxed(), &options)
                .await?;
            info!("Uploaded {} to {}", file.display(), location);
        }
        Command::Cp {
            source,
            destination,
        } => {
            drive
                .copy(&source, &destination, &CopyOptions::default())
                .await?;
        }
        Command::Mv {
            source,
            destination,
        } => {
            drive
                .move_file(&source, &destination, &CopyOptions::default())
                .await?;
        }
        Command::Rm { location } => drive.delete(&location).await?,
        Command::Stat { location } => {
            let stats = drive.get_stats(&location).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Url { location } => println!("{}", drive.get_url(&location)),
        Command::Sign {
            location,
            permissions,
            expires_in,
        } => {
            let expires_in = expires_in.map(sas_duration).transpose()?;
            let options = SasOptions {
                permissions: Some(SasPermissions::parse(&permissions)?),
                expires_in,
                ..Default::default()
            };
            println!("{}", drive.get_signed_url(&location, &options).await?);
        }
        Command::Container { action } => match action {
            ContainerAction::Create { name } => {
                drive
                    .create_container(&name, &ContainerOptions::default())
                    .await?;
                info!("Created container {}", name);
            }
            ContainerAction::Delete { name } => {
                drive.delete_container(&name).await?;
                info!("Deleted container {}", name);
            }
            ContainerAction::Exists { name } => {
                println!("{}", drive.exists_container(&name).await?);
            }
        },
    }

    Ok(())
}

fn sas_duration(secs: i64) -> Result<chrono::Duration, BoxError> {
    chrono::Duration::try_seconds(secs)
        .ok_or_else(|| format!("--expires-in {} is out of range", secs).into())
}
