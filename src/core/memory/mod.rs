pub mod bus;

/// Physical-address callbacks the core drives. Reads return zero-extended
/// values of the access width. Implementors own the invalidation contract:
/// every committed write must drop the owning block cache page, or stale
/// compiled code will keep running after self-modification.
pub trait Bus {
    fn read_byte(&mut self, address: u32) -> u8;
    fn read_half(&mut self, address: u32) -> u16;
    fn read_word(&mut self, address: u32) -> u32;
    fn read_dword(&mut self, address: u32) -> u64;

    fn write_byte(&mut self, address: u32, value: u8);
    fn write_half(&mut self, address: u32, value: u16);
    fn write_word(&mut self, address: u32, value: u32);
    fn write_dword(&mut self, address: u32, value: u64);
}
