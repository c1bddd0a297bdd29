// Kernel panic handler for bare-metal builds

#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    crate::error!("KERNEL PANIC: {}", info);
    loop {
        core::hint::spin_loop();
    }
}
