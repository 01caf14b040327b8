use clap::Parser;
use std::path::PathBuf;

/// 把一个宿主机目录下的文件打包进 tiny-fs 镜像
#[derive(Parser)]
pub struct Cli {
    /// Host directory holding the files to pack
    #[arg(long, short)]
    pub source: PathBuf,

    /// Image file to create
    #[arg(long, short)]
    pub image: PathBuf,

    /// Image size in sectors
    #[arg(long, short = 'n', default_value_t = 4096)]
    pub sectors: usize,
}
