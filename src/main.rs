fn main() {
    grain_tracks::cli::run();
}
