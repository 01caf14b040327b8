mod cli;

use std::fs;
use std::io;
use std::sync::Arc;

use clap::Parser;
use log::info;

use cli::Cli;
use tiny_fs::FileSystem;
use tiny_fs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let device = Arc::new(BlockFile::create(&cli.image, cli.sectors)?);
    let fs = FileSystem::format(device, cli.sectors);

    for entry in fs::read_dir(&cli.source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry
            .file_name()
            .into_string()
            .expect("file name is not valid UTF-8");
        let data = fs::read(entry.path())?;

        let path = format!("/{name}");
        assert!(fs.create(&path, 0), "creating {path:?} failed");
        let file = fs.open(&path).expect("just created");
        assert_eq!(file.write_at(0, &data), data.len(), "image out of space");
        println!("packed {name}: {} bytes", data.len());
    }

    info!("{} sectors left free", fs.free_sectors());
    fs.shutdown();
    Ok(())
}
