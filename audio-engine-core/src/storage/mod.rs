pub mod file_writer;
pub mod wav_codec;
